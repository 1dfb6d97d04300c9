//! A minimal line-splitting stdin input (§4.3 "Input"/"Splitter"/"Decoder",
//! §10): reads bytes from stdin, a [`LineSplitter`] pulls newline-delimited
//! records out of the accumulated buffer, and a [`PlainLineDecoder`] turns
//! each record into a message whose payload is the line text. The input's
//! decorator then stamps process-local headers (hostname, pid) onto the
//! decoded pack immediately before delivery (§4.5) — the splitter hasn't
//! signalled that the content is pre-encoded, so the decorator is not
//! skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use heka_core::{Decoder, DecodeFailure, Input, InputRunner, Pack, PackPool, ProcessError, Splitter};

/// Pure function over a byte window (§4.3 "Splitter"): consumes up to and
/// including the next `\n`, handing back the line with the delimiter
/// stripped.
#[derive(Default)]
pub struct LineSplitter;

impl Splitter for LineSplitter {
    fn find_record(&mut self, buf: &[u8]) -> (usize, Option<Vec<u8>>) {
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, Some(buf[..pos].to_vec())),
            None => (0, None),
        }
    }
}

/// Decodes one line of raw text into a message (§4.3 "Decoder"): the
/// first (and only) element of the returned list is the input pack
/// itself, reused.
#[derive(Default)]
pub struct PlainLineDecoder;

impl Decoder for PlainLineDecoder {
    fn decode(&mut self, mut pack: Pack, _pool: &PackPool) -> Result<Vec<Pack>, DecodeFailure> {
        let text = String::from_utf8(std::mem::take(&mut pack.msg_bytes)).map_err(DecodeFailure::new)?;
        pack.message.r#type = "hekad.stdin".to_owned();
        pack.message.payload = text;
        Ok(vec![pack])
    }
}

pub struct StdinLineInput {
    hostname: String,
    pool: Arc<PackPool>,
    splitter: LineSplitter,
    decoder: PlainLineDecoder,
    stopping: Arc<AtomicBool>,
}

impl StdinLineInput {
    pub fn new(hostname: String, pool: Arc<PackPool>, splitter: LineSplitter, decoder: PlainLineDecoder) -> Self {
        StdinLineInput {
            hostname,
            pool,
            splitter,
            decoder,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn emit_record(&mut self, runner: &InputRunner, record: Vec<u8>) -> Result<(), ProcessError> {
        let mut pack = runner.acquire_pack().await.map_err(ProcessError::retry)?;
        pack.msg_bytes = record;

        let hostname = self.hostname.clone();
        pack.decorator = Some(Box::new(move |p: &mut Pack| {
            p.message.hostname = hostname;
            p.message.pid = std::process::id() as i32;
        }));

        let decoded = self.decoder.decode(pack, &self.pool).map_err(ProcessError::permanent)?;
        for mut pack in decoded {
            pack.apply_decorator(false);
            runner.deliver(pack).await.map_err(ProcessError::retry)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Input for StdinLineInput {
    async fn run(&mut self, runner: InputRunner) -> Result<(), ProcessError> {
        let mut stdin = tokio::io::stdin();
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return Ok(());
            }

            // `tokio::io::stdin` has no true async cancellation on most
            // platforms; `stop()` is observed between reads, which is
            // sufficient for a pipe/file source that eventually hits EOF.
            let n = match stdin.read(&mut chunk).await {
                Ok(0) => {
                    if !buf.is_empty() {
                        let tail = std::mem::take(&mut buf);
                        self.emit_record(&runner, tail).await?;
                    }
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => return Err(ProcessError::permanent(e)),
            };
            buf.extend_from_slice(&chunk[..n]);

            loop {
                let (consumed, record) = self.splitter.find_record(&buf);
                if consumed == 0 {
                    break;
                }
                buf.drain(..consumed);
                if let Some(record) = record {
                    self.emit_record(&runner, record).await?;
                }
            }
        }
    }

    async fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_splitter_consumes_through_the_delimiter() {
        let mut splitter = LineSplitter;
        let (consumed, record) = splitter.find_record(b"hello\nworld");
        assert_eq!(consumed, 6);
        assert_eq!(record, Some(b"hello".to_vec()));
    }

    #[test]
    fn line_splitter_waits_for_a_complete_line() {
        let mut splitter = LineSplitter;
        let (consumed, record) = splitter.find_record(b"partial");
        assert_eq!(consumed, 0);
        assert_eq!(record, None);
    }

    #[tokio::test]
    async fn plain_line_decoder_sets_payload_from_record_bytes() {
        let pool = PackPool::new(1, PackPool::DEFAULT_MAX_LOOP_COUNT);
        let mut pack = pool.acquire().await.unwrap();
        pack.msg_bytes = b"hello world".to_vec();

        let mut decoder = PlainLineDecoder;
        let decoded = decoder.decode(pack, &pool).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].message.payload, "hello world");
        assert_eq!(decoded[0].message.r#type, "hekad.stdin");
    }
}
