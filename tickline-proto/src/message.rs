//! Sending and receiving [`Message`]s over a [`tickline_io::Line`].

use tickline_io::{IoError, Line};

use crate::error::ProtocolError;
use crate::frame::{Message, MAX_FRAME_COUNT};

/// Serializes and parses [`Message`]s on a line. `send`
/// performs one contiguous write of the encoded message; `read` loops on
/// exact-length reads for the frame count, each frame's length, and each
/// frame's bytes, continuing a partial read until the declared length is
/// satisfied.
pub struct MessageProtocol;

impl MessageProtocol {
    /// Encodes `msg` into one buffer and writes it to `line`, retrying short
    /// writes until the whole buffer is sent.
    pub fn send(line: &dyn Line, msg: &Message) -> Result<(), ProtocolError> {
        let buf = msg.encode();
        write_all(line, &buf)
    }

    /// Reads one complete [`Message`] from `line`. A zero-length read before
    /// any byte of the message has arrived is reported as
    /// [`IoError::Timeout`] so callers can poll a shutdown flag between
    /// messages; a zero-length read in the middle of a message is retried,
    /// since the peer has already committed to sending a full message.
    pub fn read(line: &dyn Line) -> Result<Message, ProtocolError> {
        let mut count_buf = [0u8; 4];
        read_exact(line, &mut count_buf)?;
        let frame_count = u32::from_le_bytes(count_buf);
        if frame_count > MAX_FRAME_COUNT {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame count {frame_count} exceeds the maximum of {MAX_FRAME_COUNT}"
            )));
        }

        let mut frames = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            let mut len_buf = [0u8; 4];
            read_exact(line, &mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut frame_buf = vec![0u8; len];
            read_exact(line, &mut frame_buf)?;
            frames.push(frame_buf.into());
        }
        Ok(Message::new(frames))
    }
}

fn read_exact(line: &dyn Line, buf: &mut [u8]) -> Result<(), ProtocolError> {
    let mut total = 0;
    while total < buf.len() {
        let n = line.read(&mut buf[total..])?;
        if n == 0 {
            if total == 0 {
                return Err(ProtocolError::Io(IoError::Timeout));
            }
            continue;
        }
        total += n;
    }
    Ok(())
}

fn write_all(line: &dyn Line, buf: &[u8]) -> Result<(), ProtocolError> {
    let mut total = 0;
    while total < buf.len() {
        let n = line.write(&buf[total..])?;
        if n == 0 {
            return Err(ProtocolError::MalformedFrame(
                "line accepted zero bytes on a non-empty write".into(),
            ));
        }
        total += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickline_io::line::LineFactory;

    #[test]
    fn send_then_read_round_trips_over_inproc() {
        let factory = tickline_io::line::inproc::InprocLineFactory::new();
        let acceptor = factory.create_server("inproc://proto-test").unwrap();

        let client = std::thread::spawn(move || {
            let factory = tickline_io::line::inproc::InprocLineFactory::new();
            let line = factory.create_client("inproc://proto-test").unwrap();
            let msg = Message::control(r#"{"command":"request-capabilities"}"#);
            MessageProtocol::send(line.as_ref(), &msg).unwrap();
            line
        });

        let server_line = acceptor
            .wait_connection(std::time::Duration::from_secs(2))
            .unwrap()
            .expect("connection arrives");
        let received = MessageProtocol::read(server_line.as_ref()).unwrap();
        let _client_line = client.join().unwrap();

        assert_eq!(
            received.frame(1).unwrap().as_bytes(),
            br#"{"command":"request-capabilities"}"#
        );
    }

    #[test]
    fn read_rejects_frame_count_above_the_maximum() {
        let factory = tickline_io::line::inproc::InprocLineFactory::new();
        let acceptor = factory.create_server("inproc://proto-frame-count-limit").unwrap();

        let client = std::thread::spawn(move || {
            let factory = tickline_io::line::inproc::InprocLineFactory::new();
            let line = factory.create_client("inproc://proto-frame-count-limit").unwrap();
            write_all(line.as_ref(), &0xFFFF_FFFFu32.to_le_bytes()).unwrap();
            line
        });

        let server_line = acceptor
            .wait_connection(std::time::Duration::from_secs(2))
            .unwrap()
            .expect("connection arrives");
        assert!(MessageProtocol::read(server_line.as_ref()).is_err());
        let _client_line = client.join().unwrap();
    }
}
