//! UI 通道：出站消息发送端 + JSON 行读写
//!
//! 出站发送是 fire-and-forget：编排器不等待送达确认，UI 已关闭时仅记录 debug 日志。

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::message::{Envelope, InboundMessage, OutboundMessage};

/// 发往 UI 的通道（可廉价 clone）
#[derive(Debug, Clone)]
pub struct UiChannel {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl UiChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn post(&self, message: OutboundMessage) {
        let command = message.command();
        if self.tx.send(message).is_err() {
            tracing::debug!("UI channel closed, dropping '{}'", command);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 把出站消息逐行写为 JSON（每行一个信封）
pub fn spawn_json_writer<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    mut writer: W,
) -> tokio::task::JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let line = match msg.to_json() {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("Serialize error for '{}': {}", msg.command(), e);
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                tracing::warn!("UI writer closed");
                break;
            }
        }
    })
}

/// 逐行读取入站 JSON 信封并解码；解析失败的行记录日志后跳过
pub fn spawn_json_reader<R>(
    reader: R,
    tx: mpsc::UnboundedSender<InboundMessage>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(l)) => l,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("UI read error: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let envelope: Envelope = match serde_json::from_str(&line) {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!("Dropping unparsable envelope: {}", e);
                    continue;
                }
            };
            match InboundMessage::decode(envelope) {
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_skips_bad_lines() {
        let input = b"{\"command\":\"endSession\"}\nnot json\n\n{\"command\":\"getTraceData\"}\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_json_reader(&input[..], tx).await.unwrap();

        assert!(matches!(rx.recv().await, Some(InboundMessage::EndSession)));
        assert!(matches!(rx.recv().await, Some(InboundMessage::GetTraceData)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_emits_json_lines() {
        let (ui, rx) = UiChannel::new();
        let (client, mut server) = tokio::io::duplex(1024);
        let handle = spawn_json_writer(rx, client);

        ui.post(OutboundMessage::ClearMessages);
        ui.post(OutboundMessage::SessionEnded);
        drop(ui);
        handle.await.unwrap();

        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut out).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec![r#"{"command":"clearMessages"}"#, r#"{"command":"sessionEnded"}"#]);
    }
}
