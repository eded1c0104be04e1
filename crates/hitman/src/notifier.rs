//! Chat delivery for the standalone server: messages go to the log.

use hitman_core::{HitResult, Notifier, Participant};
use tracing::info;

/// Writes every player message to the log.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn send_message(&self, participant: &Participant, text: &str) -> HitResult<()> {
        info!("[to {}] {}", participant.display_name, text);
        Ok(())
    }
}
