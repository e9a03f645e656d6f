//! Domain error types.

/// Top-level error type for dashtrader.
#[derive(Debug, thiserror::Error)]
pub enum DashtraderError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no data for {ticker}")]
    NoData { ticker: String },

    #[error("market data error: {reason}")]
    MarketData { reason: String },

    #[error("broker error: {reason}")]
    Broker { reason: String },

    #[error("insufficient funds for {ticker}: need {required:.2}, have {available:.2}")]
    InsufficientFunds {
        ticker: String,
        required: f64,
        available: f64,
    },

    #[error("no open position in {ticker}")]
    NoPosition { ticker: String },

    #[error("invalid order for {ticker}: {reason}")]
    InvalidOrder { ticker: String, reason: String },

    #[error("template error: {reason}")]
    Template { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&DashtraderError> for std::process::ExitCode {
    fn from(err: &DashtraderError) -> Self {
        let code: u8 = match err {
            DashtraderError::Io(_) | DashtraderError::Template { .. } => 1,
            DashtraderError::ConfigParse { .. }
            | DashtraderError::ConfigMissing { .. }
            | DashtraderError::ConfigInvalid { .. } => 2,
            DashtraderError::Database { .. } | DashtraderError::DatabaseQuery { .. } => 3,
            DashtraderError::MarketData { .. } | DashtraderError::Broker { .. } => 4,
            DashtraderError::NoData { .. } => 5,
            DashtraderError::InsufficientFunds { .. }
            | DashtraderError::NoPosition { .. }
            | DashtraderError::InvalidOrder { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
