//! A minimal stdout output (§10): encodes each routed message with the
//! reference envelope codec and writes it, length-prefixed, to stdout —
//! the companion read side of [`super::stdin_input`] would be a splitter
//! reading `heka_codec::envelope::write_length_prefixed`'s framing back
//! off a byte stream.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex as AsyncMutex;

use heka_core::{Encoder, Message, Output, OutputRunner, Pack, ProcessError};

/// Wraps the reference envelope codec as a stage [`Encoder`] (§4.3, §6).
#[derive(Default)]
pub struct EnvelopeEncoder;

impl Encoder for EnvelopeEncoder {
    fn encode(&mut self, message: &Message) -> Option<Vec<u8>> {
        Some(heka_codec::encode_message(message))
    }
}

pub struct StdoutOutput {
    encoder: Box<dyn Encoder>,
    stdout: AsyncMutex<Stdout>,
}

impl StdoutOutput {
    pub fn new(encoder: Box<dyn Encoder>) -> Self {
        StdoutOutput {
            encoder,
            stdout: AsyncMutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl Output for StdoutOutput {
    async fn process_message(&mut self, pack: Arc<Pack>, _runner: &OutputRunner) -> Result<(), ProcessError> {
        let Some(bytes) = self.encoder.encode(&pack.message) else {
            // A `None` from the encoder means "drop silently" (§4.3 Encoder).
            return Ok(());
        };

        let mut framed = Vec::with_capacity(bytes.len() + 4);
        framed.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        framed.extend_from_slice(&bytes);

        let mut stdout = self.stdout.lock().await;
        stdout.write_all(&framed).await.map_err(ProcessError::retry)?;
        stdout.flush().await.map_err(ProcessError::retry)
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.stdout.lock().await.flush().await {
            tracing::warn!(error = %e, "failed to flush stdout during cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_produces_a_decodable_envelope() {
        let mut message = Message::new();
        message.payload = "hello".into();
        let mut encoder = EnvelopeEncoder;
        let bytes = encoder.encode(&message).unwrap();
        let decoded = heka_codec::decode_message(&bytes).unwrap();
        assert_eq!(decoded.payload, "hello");
    }

}
