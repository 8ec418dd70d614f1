use std::io::Write as _;
use std::sync::OnceLock;
use std::time::Instant;

fn started() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// Installs the global logger. Lines look like `[12.34s] INFO message`;
/// `RUST_LOG` overrides the default `info` filter.
pub fn init() {
    started();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{:.2}s] {} {}",
                started().elapsed().as_secs_f64(),
                record.level(),
                record.args()
            )
        })
        .init();
}
