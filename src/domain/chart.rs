//! Inline SVG charts for the dashboard.

use std::fmt::Write;

use super::account::EquityPoint;
use super::bar::Bar;
use super::order::OrderSide;
use super::trade::TradeMarker;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 300.0;
const PADDING: f64 = 40.0;

const BUY_COLOR: &str = "green";
const SELL_COLOR: &str = "red";

struct Scale {
    min: f64,
    max: f64,
}

impl Scale {
    fn fit(values: impl Iterator<Item = f64>) -> Self {
        let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        Scale { min, max }
    }

    fn y(&self, value: f64) -> f64 {
        let plot_height = HEIGHT - 2.0 * PADDING;
        let range = self.max - self.min;
        if range > 0.0 {
            HEIGHT - PADDING - (value - self.min) / range * plot_height
        } else {
            HEIGHT / 2.0
        }
    }
}

fn x_at(index: usize, count: usize) -> f64 {
    let plot_width = WIDTH - 2.0 * PADDING;
    if count > 1 {
        PADDING + index as f64 * plot_width / (count - 1) as f64
    } else {
        WIDTH / 2.0
    }
}

fn open_svg(out: &mut String, class: &str, label: &str) {
    let _ = write!(
        out,
        r#"<svg class="{class}" xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w:.0} {h:.0}" width="{w:.0}" height="{h:.0}" role="img" aria-label="{label}">"#,
        w = WIDTH,
        h = HEIGHT,
    );
    let _ = write!(
        out,
        r##"<line x1="{p:.0}" y1="{p:.0}" x2="{p:.0}" y2="{b:.0}" stroke="#999"/><line x1="{p:.0}" y1="{b:.0}" x2="{r:.0}" y2="{b:.0}" stroke="#999"/>"##,
        p = PADDING,
        b = HEIGHT - PADDING,
        r = WIDTH - PADDING,
    );
}

fn axis_labels(out: &mut String, scale: &Scale) {
    let _ = write!(
        out,
        r#"<text x="4" y="{top:.1}" font-size="11">{max:.2}</text><text x="4" y="{bottom:.1}" font-size="11">{min:.2}</text>"#,
        top = PADDING,
        bottom = HEIGHT - PADDING,
        max = scale.max,
        min = scale.min,
    );
}

/// Line chart of account equity over time.
pub fn equity_curve_svg(points: &[EquityPoint]) -> String {
    if points.is_empty() {
        return r#"<p class="chart-empty">No equity data available.</p>"#.to_string();
    }

    let scale = Scale::fit(points.iter().map(|p| p.equity));
    let polyline: Vec<String> = points
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{:.1},{:.1}", x_at(i, points.len()), scale.y(p.equity)))
        .collect();

    let mut svg = String::new();
    open_svg(&mut svg, "equity-curve", "Equity Curve");
    axis_labels(&mut svg, &scale);
    let _ = write!(
        svg,
        r#"<polyline fill="none" stroke="steelblue" stroke-width="2" points="{}"/>"#,
        polyline.join(" ")
    );
    if let (Some(first), Some(last)) = (points.first(), points.last()) {
        let _ = write!(
            svg,
            r#"<text x="{l:.0}" y="{y:.0}" font-size="11">{}</text><text x="{r:.0}" y="{y:.0}" font-size="11" text-anchor="end">{}</text>"#,
            first.timestamp.format("%Y-%m-%d %H:%M"),
            last.timestamp.format("%Y-%m-%d %H:%M"),
            l = PADDING,
            r = WIDTH - PADDING,
            y = HEIGHT - PADDING / 3.0,
        );
    }
    svg.push_str("</svg>");
    svg
}

/// Candlestick chart with trade markers overlaid at their fill price.
/// Markers outside the span of `bars` are not drawn.
pub fn candlestick_svg(ticker: &str, bars: &[Bar], markers: &[TradeMarker]) -> String {
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return format!(r#"<p class="chart-empty">No price data available for {ticker}.</p>"#);
    };
    let visible: Vec<&TradeMarker> = markers
        .iter()
        .filter(|m| m.time >= first.timestamp && m.time <= last.timestamp)
        .collect();

    let scale = Scale::fit(
        bars.iter()
            .flat_map(|b| [b.high, b.low])
            .chain(visible.iter().map(|m| m.price)),
    );
    let count = bars.len();
    let plot_width = WIDTH - 2.0 * PADDING;
    let body_width = (plot_width / count as f64 * 0.6).clamp(1.0, 12.0);

    let mut svg = String::new();
    open_svg(&mut svg, "candlestick", &format!("{ticker} price"));
    axis_labels(&mut svg, &scale);

    for (i, bar) in bars.iter().enumerate() {
        let x = x_at(i, count);
        let color = if bar.is_bullish() { BUY_COLOR } else { SELL_COLOR };
        let top = scale.y(bar.open.max(bar.close));
        let bottom = scale.y(bar.open.min(bar.close));
        let _ = write!(
            svg,
            r#"<line class="wick" x1="{x:.1}" y1="{hi:.1}" x2="{x:.1}" y2="{lo:.1}" stroke="{color}"/><rect class="candle" x="{bx:.1}" y="{top:.1}" width="{bw:.1}" height="{bh:.1}" fill="{color}"/>"#,
            hi = scale.y(bar.high),
            lo = scale.y(bar.low),
            bx = x - body_width / 2.0,
            bw = body_width,
            bh = (bottom - top).max(1.0),
        );
    }

    for marker in visible {
        // first bar at or after the fill time
        let index = bars
            .iter()
            .position(|b| b.timestamp >= marker.time)
            .unwrap_or(count - 1);
        let color = match marker.side {
            OrderSide::Buy => BUY_COLOR,
            OrderSide::Sell => SELL_COLOR,
        };
        let _ = write!(
            svg,
            r#"<circle class="trade-marker {side}" cx="{x:.1}" cy="{y:.1}" r="5" fill="{color}" stroke="black"><title>{side} @ {price:.2}</title></circle>"#,
            side = marker.side,
            x = x_at(index, count),
            y = scale.y(marker.price),
            price = marker.price,
        );
    }

    svg.push_str("</svg>");
    svg
}
