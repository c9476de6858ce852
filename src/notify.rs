use log::info;

/// Best-effort notification sink. Implementations must swallow delivery
/// failures; the engine never inspects the outcome.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Default sink that writes notifications to the log. Desktop shells replace
/// this with their native notification surface.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!("notification: {title}: {body}");
    }
}
