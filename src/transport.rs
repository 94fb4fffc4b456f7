//! Instrument session: the command/response channel to one DT8824.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use log::{debug, warn};

use crate::protocol::{frame_sample_count, FRAME_HEADER_LEN, SAMPLE_LEN};
use crate::types::SessionConfig;
use crate::Dt8824Error;

/// Ordered, synchronous request/response channel to an instrument.
///
/// Implementations never pipeline: every call completes its exchange
/// before returning.
pub trait Transport {
    /// Send a command that has no reply.
    fn write(&mut self, command: &str) -> Result<(), Dt8824Error>;

    /// Send a command and read one text reply line (terminator stripped).
    fn query(&mut self, command: &str) -> Result<String, Dt8824Error>;

    /// Send a command and read one binary fetch frame (terminator stripped).
    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, Dt8824Error>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, command: &str) -> Result<(), Dt8824Error> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, Dt8824Error> {
        (**self).query(command)
    }

    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, Dt8824Error> {
        (**self).query_binary(command)
    }
}

/// SCPI over a raw TCP socket.
///
/// Commands are newline-terminated. Fetch frames have no length prefix, so
/// the payload size is taken from the header's returned-sample count.
///
/// A failed read or write leaves the stream at an unknown position, so the
/// session is marked desynchronized and every later call fails with
/// `Transport` until [`reconnect`](Self::reconnect) succeeds.
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    stream: TcpStream,
    addr: SocketAddr,
    config: SessionConfig,
    desynced: bool,
}

impl TcpTransport {
    /// Connect to `address` (host name or IP) on `config.port`.
    pub fn connect(address: &str, config: &SessionConfig) -> Result<Self, Dt8824Error> {
        let addr = resolve(address, config.port)?;
        let (stream, reader) = open_stream(addr, config)?;
        Ok(Self {
            reader,
            stream,
            addr,
            config: config.clone(),
            desynced: false,
        })
    }

    /// Drop the current connection and open a fresh one to the same address.
    pub fn reconnect(&mut self) -> Result<(), Dt8824Error> {
        let (stream, reader) = open_stream(self.addr, &self.config)?;
        self.stream = stream;
        self.reader = reader;
        self.desynced = false;
        debug!("Reconnected to {}", self.addr);
        Ok(())
    }

    /// `true` after a failed exchange, until the next successful reconnect.
    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    fn check_sync(&self) -> Result<(), Dt8824Error> {
        if self.desynced {
            return Err(Dt8824Error::Transport(format!(
                "Session to {} desynchronized by an earlier failure, reconnect first",
                self.addr
            )));
        }
        Ok(())
    }

    fn desync(&mut self, err: Dt8824Error) -> Dt8824Error {
        warn!("Session to {} desynchronized: {err}", self.addr);
        self.desynced = true;
        err
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, Dt8824Error> {
        let mut buf = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut buf) {
            let err = if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Dt8824Error::Protocol(format!("Connection closed mid-frame: {e}"))
            } else {
                Dt8824Error::Transport(format!("Read failed: {e}"))
            };
            return Err(self.desync(err));
        }
        Ok(buf)
    }
}

fn open_stream(
    addr: SocketAddr,
    config: &SessionConfig,
) -> Result<(TcpStream, BufReader<TcpStream>), Dt8824Error> {
    debug!("Connecting to {addr}");
    let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)
        .map_err(|e| Dt8824Error::Transport(format!("Failed to connect to {addr}: {e}")))?;
    stream
        .set_read_timeout(Some(config.io_timeout))
        .map_err(|e| Dt8824Error::Transport(format!("Set read timeout failed: {e}")))?;
    stream
        .set_write_timeout(Some(config.io_timeout))
        .map_err(|e| Dt8824Error::Transport(format!("Set write timeout failed: {e}")))?;
    stream
        .set_nodelay(true)
        .map_err(|e| Dt8824Error::Transport(format!("Set nodelay failed: {e}")))?;

    let reader = stream
        .try_clone()
        .map_err(|e| Dt8824Error::Transport(format!("Failed to clone socket: {e}")))?;
    Ok((stream, BufReader::new(reader)))
}

fn resolve(address: &str, port: u16) -> Result<SocketAddr, Dt8824Error> {
    (address, port)
        .to_socket_addrs()
        .map_err(|e| Dt8824Error::Transport(format!("Cannot resolve {address}: {e}")))?
        .next()
        .ok_or_else(|| Dt8824Error::Transport(format!("No address for {address}")))
}

impl Transport for TcpTransport {
    fn write(&mut self, command: &str) -> Result<(), Dt8824Error> {
        self.check_sync()?;
        debug!("> {command}");
        let sent = self
            .stream
            .write_all(format!("{command}\n").as_bytes())
            .and_then(|_| self.stream.flush());
        if let Err(e) = sent {
            return Err(self.desync(Dt8824Error::Transport(format!("Write failed: {e}"))));
        }
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, Dt8824Error> {
        self.write(command)?;
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                let err = Dt8824Error::Transport("Connection closed by instrument".into());
                return Err(self.desync(err));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(self.desync(Dt8824Error::Transport(format!("Read failed: {e}"))));
            }
        }
        // The whole line was consumed, so a bad encoding leaves the session in step.
        let text = String::from_utf8(line)
            .map_err(|e| Dt8824Error::Protocol(format!("Reply is not text: {e}")))?;
        let reply = text.trim_end_matches(['\n', '\r']).to_string();
        debug!("< {reply}");
        Ok(reply)
    }

    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, Dt8824Error> {
        self.write(command)?;
        let mut frame = self.read_exact(FRAME_HEADER_LEN)?;
        let count = match frame_sample_count(&frame) {
            Ok(count) => count as usize,
            // Payload of unknown size is still in flight.
            Err(e) => return Err(self.desync(e)),
        };
        // Payload plus the trailing terminator byte.
        let rest = self.read_exact(count * SAMPLE_LEN + 1)?;
        frame.extend_from_slice(&rest[..rest.len() - 1]);
        debug!("< frame, {count} samples");
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    /// Start a one-shot server; `serve` gets each accepted connection in turn.
    fn server<F>(connections: usize, serve: F) -> (SessionConfig, JoinHandle<()>)
    where
        F: Fn(usize, &mut BufReader<TcpStream>, &mut TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            for i in 0..connections {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                serve(i, &mut reader, &mut stream);
            }
        });
        let config = SessionConfig {
            port,
            io_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        (config, handle)
    }

    fn expect_command(reader: &mut BufReader<TcpStream>, command: &str) {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, format!("{command}\n"));
    }

    fn header(count: u32) -> Vec<u8> {
        let mut data = vec![0u8; FRAME_HEADER_LEN];
        data[8..12].copy_from_slice(&count.to_be_bytes());
        data
    }

    #[test]
    fn query_strips_line_ending() {
        let (config, handle) = server(1, |_, reader, stream| {
            expect_command(reader, ":AD:CLOC:FREQ?");
            stream.write_all(b"4800.0\r\n").unwrap();
        });
        let mut t = TcpTransport::connect("127.0.0.1", &config).unwrap();
        assert_eq!(t.query(":AD:CLOC:FREQ?").unwrap(), "4800.0");
        drop(t);
        handle.join().unwrap();
    }

    #[test]
    fn late_reply_is_never_handed_to_next_command() {
        let (config, handle) = server(2, |i, reader, stream| {
            if i == 0 {
                expect_command(reader, ":AD:STAT:SCA?");
                thread::sleep(Duration::from_millis(300));
                let _ = stream.write_all(b"0,100\n");
            } else {
                expect_command(reader, ":AD:CLOC:FREQ?");
                stream.write_all(b"4800.0\n").unwrap();
            }
        });
        let mut t = TcpTransport::connect("127.0.0.1", &config).unwrap();

        let first = t.query(":AD:STAT:SCA?");
        assert!(matches!(first, Err(Dt8824Error::Transport(_))));
        assert!(t.is_desynced());

        thread::sleep(Duration::from_millis(400));
        let second = t.query(":AD:CLOC:FREQ?");
        assert!(matches!(second, Err(Dt8824Error::Transport(_))));
        assert!(matches!(t.query_binary(":AD:FETCH? 1"), Err(Dt8824Error::Transport(_))));

        t.reconnect().unwrap();
        assert!(!t.is_desynced());
        assert_eq!(t.query(":AD:CLOC:FREQ?").unwrap(), "4800.0");
        drop(t);
        handle.join().unwrap();
    }

    #[test]
    fn frame_terminator_stripped() {
        let (config, handle) = server(1, |_, reader, stream| {
            expect_command(reader, ":AD:FETCH? 11");
            let mut reply = header(2);
            reply.extend_from_slice(&[0, 0, 1, 0, 0, 0, 0, 7, b'\n']);
            stream.write_all(&reply).unwrap();
            expect_command(reader, "AD:STAT?");
            stream.write_all(b"6\n").unwrap();
        });
        let mut t = TcpTransport::connect("127.0.0.1", &config).unwrap();

        let frame = t.query_binary(":AD:FETCH? 11").unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 8);
        assert_eq!(crate::protocol::decode_frame(&frame).unwrap().samples, vec![256, 7]);
        // Next reply lines up with its command.
        assert_eq!(t.query("AD:STAT?").unwrap(), "6");
        drop(t);
        handle.join().unwrap();
    }

    #[test]
    fn short_header_is_protocol_error() {
        let (config, handle) = server(1, |_, reader, stream| {
            expect_command(reader, ":AD:FETCH? 1");
            stream.write_all(&[0u8; 10]).unwrap();
        });
        let mut t = TcpTransport::connect("127.0.0.1", &config).unwrap();
        assert!(matches!(t.query_binary(":AD:FETCH? 1"), Err(Dt8824Error::Protocol(_))));
        handle.join().unwrap();
        assert!(t.is_desynced());
    }

    #[test]
    fn cut_off_payload_is_protocol_error() {
        let (config, handle) = server(1, |_, reader, stream| {
            expect_command(reader, ":AD:FETCH? 1");
            let mut reply = header(3);
            reply.extend_from_slice(&[0, 0, 0, 1]);
            stream.write_all(&reply).unwrap();
        });
        let mut t = TcpTransport::connect("127.0.0.1", &config).unwrap();
        assert!(matches!(t.query_binary(":AD:FETCH? 1"), Err(Dt8824Error::Protocol(_))));
        handle.join().unwrap();
    }

    #[test]
    fn oversized_count_rejected_before_reading_payload() {
        let (config, handle) = server(1, |_, reader, stream| {
            expect_command(reader, ":AD:FETCH? 1");
            stream.write_all(&header(u32::MAX)).unwrap();
        });
        let mut t = TcpTransport::connect("127.0.0.1", &config).unwrap();
        assert!(matches!(t.query_binary(":AD:FETCH? 1"), Err(Dt8824Error::Protocol(_))));
        assert!(t.is_desynced());
        drop(t);
        handle.join().unwrap();
    }

    #[test]
    fn non_text_reply_is_protocol_error() {
        let (config, handle) = server(1, |_, reader, stream| {
            expect_command(reader, "*IDN?");
            stream.write_all(&[0xff, 0xfe, b'\n']).unwrap();
            expect_command(reader, "AD:STAT?");
            stream.write_all(b"0\n").unwrap();
        });
        let mut t = TcpTransport::connect("127.0.0.1", &config).unwrap();
        assert!(matches!(t.query("*IDN?"), Err(Dt8824Error::Protocol(_))));
        assert!(!t.is_desynced());
        assert_eq!(t.query("AD:STAT?").unwrap(), "0");
        drop(t);
        handle.join().unwrap();
    }
}
