use super::{ConnectionConfig, InstrumentLink, MAX_REPLY_SIZE};
use crate::error::ScopeError;
use log::{debug, warn};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// Longest echoed header accepted in front of a binary block (`C1:WF DAT2,`).
const MAX_BLOCK_PREFIX: usize = 256;

/// Raw SCPI over a TCP socket.
///
/// Commands are newline-terminated. Text replies end at the first `\n`;
/// binary replies carry an IEEE 488.2 definite-length block
/// (`#<digits><length><payload>`) followed by the scope's `\n\n` trailer.
pub struct SocketLink {
    resource: String,
    reader: Option<BufReader<TcpStream>>,
}

impl SocketLink {
    pub fn connect(host: &str, port: u16, config: &ConnectionConfig) -> Result<Self, ScopeError> {
        let resource = format!("TCPIP0::{host}::{port}::SOCKET");

        let socket_addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| ScopeError::connection(&resource, format!("cannot resolve host: {e}")))?
            .next()
            .ok_or_else(|| ScopeError::connection(&resource, "host resolved to no address"))?;

        debug!("Connecting to {resource} ({socket_addr})");

        let stream = TcpStream::connect_timeout(&socket_addr, config.connect_timeout).map_err(|e| {
            warn!("Failed to connect to {resource}: {e}");
            ScopeError::connection(&resource, e.to_string())
        })?;

        stream
            .set_read_timeout(Some(config.read_timeout))
            .and_then(|_| stream.set_write_timeout(Some(config.write_timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| ScopeError::connection(&resource, e.to_string()))?;

        debug!("Connected to {resource}");

        Ok(Self {
            resource,
            reader: Some(BufReader::new(stream)),
        })
    }

    fn reader(&mut self) -> Result<&mut BufReader<TcpStream>, ScopeError> {
        let resource = &self.resource;
        self.reader
            .as_mut()
            .ok_or_else(|| ScopeError::connection(resource.as_str(), "session is closed"))
    }

    fn read_byte(reader: &mut BufReader<TcpStream>, context: &str) -> Result<u8, ScopeError> {
        let mut byte = [0u8; 1];
        reader
            .read_exact(&mut byte)
            .map_err(|e| ScopeError::communication(e, context))?;
        Ok(byte[0])
    }

    fn read_block(reader: &mut BufReader<TcpStream>, reply: &mut Vec<u8>) -> Result<(), ScopeError> {
        let digits = Self::read_byte(reader, "reading block header")?;
        reply.push(digits);
        let n = (digits as char)
            .to_digit(10)
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ScopeError::Parse(format!("unsupported block length digit '{}'", digits as char))
            })? as usize;

        let mut len_bytes = vec![0u8; n];
        reader
            .read_exact(&mut len_bytes)
            .map_err(|e| ScopeError::communication(e, "reading block length"))?;
        reply.extend_from_slice(&len_bytes);

        let len = std::str::from_utf8(&len_bytes)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| ScopeError::Parse("block length is not a number".into()))?;
        if len > MAX_REPLY_SIZE {
            return Err(ScopeError::Parse(format!(
                "block of {len} bytes exceeds maximum {MAX_REPLY_SIZE}"
            )));
        }

        let start = reply.len();
        reply.resize(start + len, 0);
        reader
            .read_exact(&mut reply[start..])
            .map_err(|e| ScopeError::communication(e, format!("reading {len} byte block")))?;

        // Swallow the trailer without blocking on bytes that may never come.
        let mut trailer = 0;
        while trailer < 2 && reader.buffer().first() == Some(&b'\n') {
            reader.consume(1);
            trailer += 1;
        }
        if trailer == 0 {
            let last = Self::read_byte(reader, "reading block terminator")?;
            if last != b'\n' {
                warn!("Unexpected byte 0x{last:02x} after data block");
            }
        }
        Ok(())
    }
}

/// Read one non-blank reply line of at most `limit` bytes.
///
/// Blank lines are leftover block trailers from an earlier transfer.
fn read_reply_line<R: BufRead>(reader: &mut R, limit: usize, command: &str) -> Result<Vec<u8>, ScopeError> {
    let mut line = Vec::new();
    while line.iter().all(u8::is_ascii_whitespace) {
        line.clear();
        let read = reader
            .by_ref()
            .take(limit as u64 + 1)
            .read_until(b'\n', &mut line)
            .map_err(|e| ScopeError::communication(e, format!("reading reply to '{command}'")))?;
        if read == 0 {
            return Err(ScopeError::communication(
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
                format!("connection closed while waiting for reply to '{command}'"),
            ));
        }
        if line.len() > limit {
            return Err(ScopeError::Parse(format!(
                "reply to '{command}' exceeds maximum {limit} bytes"
            )));
        }
    }
    Ok(line)
}

impl InstrumentLink for SocketLink {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn send(&mut self, command: &str) -> Result<(), ScopeError> {
        debug!(">> {command}");
        let stream = self.reader()?.get_mut();
        stream
            .write_all(format!("{command}\n").as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| ScopeError::communication(e, format!("writing '{command}'")))
    }

    fn query(&mut self, command: &str) -> Result<String, ScopeError> {
        self.send(command)?;
        let reader = self.reader()?;
        let line = read_reply_line(reader, MAX_REPLY_SIZE, command)?;
        let reply = String::from_utf8(line)
            .map_err(|_| ScopeError::Parse(format!("reply to '{command}' is not UTF-8")))?;
        let reply = reply.trim_end().to_string();
        debug!("<< {reply}");
        Ok(reply)
    }

    fn query_raw(&mut self, command: &str) -> Result<Vec<u8>, ScopeError> {
        self.send(command)?;
        let reader = self.reader()?;
        let mut reply = Vec::new();

        loop {
            let byte = Self::read_byte(reader, "reading reply header")?;
            match byte {
                b'#' => {
                    reply.push(byte);
                    Self::read_block(reader, &mut reply)?;
                    break;
                }
                b'\n' if reply.is_empty() => continue,
                // A plain text answer with no block in it
                b'\n' => break,
                _ => {
                    reply.push(byte);
                    if reply.len() > MAX_BLOCK_PREFIX {
                        return Err(ScopeError::Parse(format!(
                            "reply to '{command}' has no data block"
                        )));
                    }
                }
            }
        }

        debug!("<< {} raw bytes", reply.len());
        Ok(reply)
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            debug!("Closing {}", self.resource);
            let _ = reader.get_ref().shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn serve_once(reply: Vec<u8>) -> (u16, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            reader.get_mut().write_all(&reply).unwrap();
            reader.get_mut().flush().unwrap();
            // Keep the socket open until the client is done reading
            thread::sleep(Duration::from_millis(100));
            line
        });
        (port, handle)
    }

    #[test]
    fn test_query_reads_one_line() {
        let (port, server) = serve_once(b"TDIV 1.00E-03S\n".to_vec());
        let mut link = SocketLink::connect("127.0.0.1", port, &ConnectionConfig::default()).unwrap();
        assert_eq!(link.query("TDIV?").unwrap(), "TDIV 1.00E-03S");
        assert_eq!(server.join().unwrap(), "TDIV?\n");
    }

    #[test]
    fn test_query_raw_reads_definite_block() {
        let mut reply = b"C1:WF DAT2,#9000000004".to_vec();
        reply.extend_from_slice(&[0x01, 0x0a, 0xff, 0x80]);
        reply.extend_from_slice(b"\n\n");
        let (port, server) = serve_once(reply);

        let mut link = SocketLink::connect("127.0.0.1", port, &ConnectionConfig::default()).unwrap();
        let raw = link.query_raw("C1:WF? DAT2").unwrap();
        assert!(raw.starts_with(b"C1:WF DAT2,#9000000004"));
        // 0x0a inside the payload must not end the read
        assert_eq!(&raw[raw.len() - 4..], &[0x01, 0x0a, 0xff, 0x80]);
        server.join().unwrap();
    }

    #[test]
    fn test_reply_line_is_capped() {
        let mut endless = std::io::Cursor::new(vec![b'x'; 64]);
        let err = read_reply_line(&mut endless, 16, "*IDN?").unwrap_err();
        assert!(matches!(err, ScopeError::Parse(_)), "{err}");
        assert!(err.is_link_failure());

        let mut ok = std::io::Cursor::new(b"\n\nTDIV 1.00E-03S\n".to_vec());
        assert_eq!(read_reply_line(&mut ok, 16, "TDIV?").unwrap(), b"TDIV 1.00E-03S\n");
    }

    #[test]
    fn test_close_is_idempotent() {
        let (port, server) = serve_once(Vec::new());
        let mut link = SocketLink::connect("127.0.0.1", port, &ConnectionConfig::default()).unwrap();
        link.close();
        link.close();
        assert!(!link.is_open());
        assert!(matches!(link.send("*IDN?"), Err(ScopeError::Connection { .. })));
        drop(server);
    }

    #[test]
    fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port with nothing listening
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let err = SocketLink::connect("127.0.0.1", port, &ConnectionConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ScopeError::Connection { .. }));
    }
}
