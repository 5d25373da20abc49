use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global structured-logging subscriber. Safe to call more than
/// once; later calls lose the race and are ignored.
pub fn init(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
