//! Log-only notifier — renders and logs instead of sending.

use async_trait::async_trait;
use subtrack_core::error::Result;
use subtrack_core::traits::Notifier;
use subtrack_core::types::Message;

use crate::render::render;

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let email = render(message);
        tracing::info!(
            "📧 [dry-run] to={} subject={:?}",
            message.recipients().join(","),
            email.subject
        );
        Ok(())
    }
}
