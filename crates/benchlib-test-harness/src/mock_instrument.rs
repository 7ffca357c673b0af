//! Scripted TCP instrument server.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How a scripted command answers.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Normal reply: `NAME,SSS,<payload>\n` (payload may be empty).
    Payload(String),
    /// Instrument-reported error: `E,SSS,<message>\n`.
    Error(String),
    /// Normal reply delivered in two TCP segments with a pause between
    /// them, for reassembly tests.
    Split {
        payload: String,
        /// Byte offset within the full reply line where the split occurs.
        split_at: usize,
    },
}

#[derive(Default)]
struct Script {
    /// Per command name, the queue of replies. The last entry is sticky:
    /// it keeps answering repeats of the same command.
    handlers: HashMap<String, VecDeque<ScriptedReply>>,
    /// Every command line received, in order.
    requests: Vec<String>,
}

/// A TCP server that speaks the BSI line protocol from a script.
///
/// Replies are keyed by command name and echo back the sequence number the
/// client actually sent, so tests stay agnostic of sequence positions.
/// Unscripted commands get an `E,...,Unknown Command` reply, which is also
/// what a real chassis does.
pub struct MockInstrument {
    addr: String,
    script: Arc<Mutex<Script>>,
    task: JoinHandle<()>,
}

impl MockInstrument {
    /// Bind an ephemeral port and start serving. Accepts connections
    /// sequentially, so reconnect scenarios work.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let script = Arc::new(Mutex::new(Script::default()));

        let serve_script = Arc::clone(&script);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => serve_connection(stream, &serve_script).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "Mock instrument accept failed");
                        break;
                    }
                }
            }
        });

        Ok(MockInstrument { addr, script, task })
    }

    /// The `host:port` address the server listens on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The host part of the address.
    pub fn host(&self) -> &str {
        self.addr.split(':').next().unwrap_or(&self.addr)
    }

    /// The port part of the address.
    pub fn port(&self) -> u16 {
        self.addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    /// Script a normal reply for `name`.
    pub fn on(&self, name: &str, payload: &str) {
        self.push(name, ScriptedReply::Payload(payload.to_string()));
    }

    /// Script an error reply for `name`.
    pub fn on_error(&self, name: &str, message: &str) {
        self.push(name, ScriptedReply::Error(message.to_string()));
    }

    /// Script a reply for `name` delivered in two segments.
    pub fn on_split(&self, name: &str, payload: &str, split_at: usize) {
        self.push(
            name,
            ScriptedReply::Split {
                payload: payload.to_string(),
                split_at,
            },
        );
    }

    fn push(&self, name: &str, reply: ScriptedReply) {
        if let Ok(mut script) = self.script.lock() {
            script
                .handlers
                .entry(name.to_string())
                .or_default()
                .push_back(reply);
        }
    }

    /// Script the two discovery commands every client issues at connect:
    /// identity and per-card serials. `serials` fill the leading slots of
    /// the 16-slot reply; the rest stay empty.
    pub fn script_discovery(&self, identity: &str, serials: &[u64]) {
        self.on("SYS_IDN", identity);
        let mut slots = vec![String::new(); 16];
        for (i, serial) in serials.iter().take(16).enumerate() {
            slots[i] = format!("{:x}", serial);
        }
        self.on("SYS_GetBSISnr", &slots.join(","));
    }

    /// Every command line received so far.
    pub fn requests(&self) -> Vec<String> {
        self.script
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    /// Received command lines whose name matches `name`.
    pub fn requests_named(&self, name: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|line| line.split(',').next() == Some(name))
            .collect()
    }
}

impl Drop for MockInstrument {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(stream: TcpStream, script: &Arc<Mutex<Script>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let trimmed = line.trim_end();
        let mut fields = trimmed.split(',');
        let name = fields.next().unwrap_or("").to_string();
        let seq = fields.next().unwrap_or("000").to_string();

        let reply = {
            let mut script = match script.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            script.requests.push(trimmed.to_string());
            match script.handlers.get_mut(&name) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        let result = match reply {
            Some(ScriptedReply::Payload(payload)) => {
                let text = if payload.is_empty() {
                    format!("{},{}\n", name, seq)
                } else {
                    format!("{},{},{}\n", name, seq, payload)
                };
                write_half.write_all(text.as_bytes()).await
            }
            Some(ScriptedReply::Error(message)) => {
                write_half
                    .write_all(format!("E,{},{}\n", seq, message).as_bytes())
                    .await
            }
            Some(ScriptedReply::Split { payload, split_at }) => {
                let text = format!("{},{},{}\n", name, seq, payload);
                let split = split_at.min(text.len());
                let first = write_half.write_all(text[..split].as_bytes()).await;
                if first.is_ok() {
                    let _ = write_half.flush().await;
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    write_half.write_all(text[split..].as_bytes()).await
                } else {
                    first
                }
            }
            None => {
                write_half
                    .write_all(format!("E,{},Unknown Command\n", seq).as_bytes())
                    .await
            }
        };
        if result.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn exchange(stream: &mut TcpStream, line: &str) -> String {
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut buf = [0u8; 512];
        let mut text = String::new();
        while !text.ends_with('\n') {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed early");
            text.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        text
    }

    #[tokio::test]
    async fn echoes_name_and_sequence() {
        let server = MockInstrument::start().await.unwrap();
        server.on("SYS_IDN", "SPEKTRA,BSI");

        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        let reply = exchange(&mut stream, "SYS_IDN,042\n").await;
        assert_eq!(reply, "SYS_IDN,042,SPEKTRA,BSI\n");
    }

    #[tokio::test]
    async fn unknown_commands_get_error_replies() {
        let server = MockInstrument::start().await.unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        let reply = exchange(&mut stream, "NOPE,007\n").await;
        assert_eq!(reply, "E,007,Unknown Command\n");
    }

    #[tokio::test]
    async fn queued_replies_play_in_order_and_last_sticks() {
        let server = MockInstrument::start().await.unwrap();
        server.on("MEAS_V_MIO01_MIO02", "9.0");
        server.on("MEAS_V_MIO01_MIO02", "5.0");

        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        let r1 = exchange(&mut stream, "MEAS_V_MIO01_MIO02,001\n").await;
        let r2 = exchange(&mut stream, "MEAS_V_MIO01_MIO02,002\n").await;
        let r3 = exchange(&mut stream, "MEAS_V_MIO01_MIO02,003\n").await;
        assert!(r1.contains("9.0"));
        assert!(r2.contains("5.0"));
        assert!(r3.contains("5.0"));
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let server = MockInstrument::start().await.unwrap();
        server.on("PWR_On1", "O");

        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        exchange(&mut stream, "PWR_On1,001,1,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0\n").await;

        let recorded = server.requests_named("PWR_On1");
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].starts_with("PWR_On1,001,1,0"));
    }
}
