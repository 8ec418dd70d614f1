//! Dual-axis SVG chart of CPU% and memory against elapsed time.

use std::fmt::Write as _;

use crate::process::Sample;

/// Runs shorter than this produce no chart.
pub const MIN_CHART_SECONDS: f64 = 2.0;

const WIDTH: f64 = 1400.0;
const HEIGHT: f64 = 500.0;
const LEFT: f64 = 80.0;
const RIGHT: f64 = 80.0;
const TOP: f64 = 50.0;
const BOTTOM: f64 = 60.0;
const CPU_COLOR: &str = "#1f77b4";
const MEM_COLOR: &str = "#9467bd";
const MAX_X_TICKS: usize = 40;

pub fn render_usage_svg(title: &str, samples: &[Sample]) -> Option<String> {
    let last = samples.last()?;
    if last.elapsed_secs < MIN_CHART_SECONDS {
        return None;
    }

    let max_t = last.elapsed_secs.floor().max(1.0);
    let max_cpu = nice_max(samples.iter().map(|s| s.cpu_percent));
    let max_mem = nice_max(samples.iter().map(|s| s.rss_mb));
    let plot_w = WIDTH - LEFT - RIGHT;
    let plot_h = HEIGHT - TOP - BOTTOM;
    let x = |t: f64| LEFT + (t.min(max_t) / max_t) * plot_w;
    let y = |v: f64, max: f64| TOP + plot_h - (v / max) * plot_h;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-size="16">CPU and Memory Usage: {}</text>"#,
        WIDTH / 2.0,
        TOP / 2.0,
        escape(title)
    );
    let _ = writeln!(
        svg,
        r#"<rect x="{LEFT}" y="{TOP}" width="{plot_w}" height="{plot_h}" fill="none" stroke="black"/>"#
    );

    let step = ((max_t as usize) / MAX_X_TICKS).max(1);
    for sec in (0..=max_t as usize).step_by(step) {
        let px = x(sec as f64);
        let _ = writeln!(
            svg,
            r#"<line x1="{px:.1}" y1="{}" x2="{px:.1}" y2="{}" stroke="black"/><text x="{px:.1}" y="{}" text-anchor="middle">{sec}</text>"#,
            TOP + plot_h,
            TOP + plot_h + 5.0,
            TOP + plot_h + 20.0
        );
    }
    for i in 0..=4 {
        let frac = i as f64 / 4.0;
        let py = TOP + plot_h - frac * plot_h;
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{py:.1}" text-anchor="end" fill="{CPU_COLOR}">{:.0}</text><text x="{}" y="{py:.1}" fill="{MEM_COLOR}">{:.0}</text>"#,
            LEFT - 6.0,
            frac * max_cpu,
            LEFT + plot_w + 6.0,
            frac * max_mem
        );
    }

    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle">Time (seconds)</text>"#,
        LEFT + plot_w / 2.0,
        HEIGHT - 15.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="20" y="{0}" fill="{CPU_COLOR}" transform="rotate(-90 20 {0})" text-anchor="middle">CPU %</text>"#,
        TOP + plot_h / 2.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="{0}" y="{1}" fill="{MEM_COLOR}" transform="rotate(90 {0} {1})" text-anchor="middle">Memory (MB)</text>"#,
        WIDTH - 20.0,
        TOP + plot_h / 2.0
    );

    let cpu: Vec<String> = samples
        .iter()
        .map(|s| format!("{:.1},{:.1}", x(s.elapsed_secs), y(s.cpu_percent, max_cpu)))
        .collect();
    let mem: Vec<String> = samples
        .iter()
        .map(|s| format!("{:.1},{:.1}", x(s.elapsed_secs), y(s.rss_mb, max_mem)))
        .collect();
    let _ = writeln!(
        svg,
        r#"<polyline fill="none" stroke="{CPU_COLOR}" stroke-width="1.5" points="{}"/>"#,
        cpu.join(" ")
    );
    let _ = writeln!(
        svg,
        r#"<polyline fill="none" stroke="{MEM_COLOR}" stroke-width="1.5" points="{}"/>"#,
        mem.join(" ")
    );
    svg.push_str("</svg>\n");
    Some(svg)
}

fn nice_max(values: impl Iterator<Item = f64>) -> f64 {
    let max = values.fold(0.0f64, f64::max);
    if max <= 0.0 {
        1.0
    } else {
        max * 1.1
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(until: f64) -> Vec<Sample> {
        let mut out = Vec::new();
        let mut t = 0.0;
        while t <= until {
            out.push(Sample {
                elapsed_secs: t,
                cpu_percent: 50.0 + t,
                rss_mb: 10.0 * t,
            });
            t += 0.25;
        }
        out
    }

    #[test]
    fn short_runs_have_no_chart() {
        assert!(render_usage_svg("x", &samples(1.5)).is_none());
        assert!(render_usage_svg("x", &[]).is_none());
    }

    #[test]
    fn chart_has_both_series_and_axis_labels() {
        let svg = render_usage_svg("case<json>", &samples(3.0)).expect("chart");
        assert!(svg.starts_with("<svg"));
        assert_eq!(svg.matches("<polyline").count(), 2);
        assert!(svg.contains("CPU %"));
        assert!(svg.contains("Memory (MB)"));
        assert!(svg.contains("case&lt;json&gt;"));
    }
}
