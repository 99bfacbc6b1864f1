//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Postbox.
//
// Postbox is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published by  the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Postbox is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Postbox. If not, see <http://www.gnu.org/licenses/>.

//! Record framing.
//!
//! Every record is a big-endian u32 length followed by that many bytes of
//! CBOR. The length prefix makes each record self-delimiting, and the CBOR
//! enum encoding carries the record tag, so a reader never needs to guess
//! at boundaries or types.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::records::Record;
use crate::support::error::Error;

/// Upper bound on a single encoded record.
///
/// Generous for any plausible message body while keeping a malformed or
/// hostile length prefix from provoking a huge allocation.
pub const MAX_RECORD_SIZE: u32 = 1 << 20;

/// Write one record and flush it onto the wire.
///
/// Unsized so it can be called directly on the `dyn Write` behind a shared
/// session channel.
pub fn write_record<W: Write + ?Sized>(
    w: &mut W,
    record: &Record,
) -> Result<(), Error> {
    let body = serde_cbor::to_vec(record)?;
    if body.len() as u64 > MAX_RECORD_SIZE as u64 {
        return Err(Error::FrameTooLarge);
    }

    w.write_u32::<BigEndian>(body.len() as u32)?;
    w.write_all(&body)?;
    w.flush()?;
    Ok(())
}

/// Read one record.
///
/// A clean end-of-stream surfaces as an `UnexpectedEof` IO error from the
/// length read; callers treat that as a normal disconnect.
pub fn read_record<R: Read>(r: &mut R) -> Result<Record, Error> {
    let len = r.read_u32::<BigEndian>()?;
    if len > MAX_RECORD_SIZE {
        return Err(Error::FrameTooLarge);
    }

    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body)?;
    Ok(serde_cbor::from_slice(&body)?)
}

#[cfg(test)]
mod test {
    use std::io;
    use std::sync::{Arc, Mutex};

    use byteorder::{BigEndian, WriteBytesExt};

    use super::*;
    use crate::wire::records::{opcodes, ControlCommand};

    #[test]
    fn records_delimit_themselves() {
        let mut wire = Vec::<u8>::new();
        write_record(
            &mut wire,
            &Record::Command(ControlCommand::new(
                opcodes::LOGIN,
                vec!["dib@example.com", "hunter2"],
            )),
        )
        .unwrap();
        write_record(
            &mut wire,
            &Record::Command(ControlCommand::new::<&str>(
                opcodes::LOGOUT,
                vec![],
            )),
        )
        .unwrap();

        let mut cursor = io::Cursor::new(wire);
        match read_record(&mut cursor).unwrap() {
            Record::Command(cmd) => {
                assert_eq!(opcodes::LOGIN, cmd.opcode);
                assert_eq!(2, cmd.args.len());
            },
            r => panic!("Unexpected record: {:?}", r),
        }
        match read_record(&mut cursor).unwrap() {
            Record::Command(cmd) => assert_eq!(opcodes::LOGOUT, cmd.opcode),
            r => panic!("Unexpected record: {:?}", r),
        }
    }

    /// A `Write` whose contents can be inspected from outside the channel.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_through_a_shared_dynamic_channel() {
        let buf = SharedBuf::default();
        let channel: Arc<Mutex<Box<dyn Write + Send>>> =
            Arc::new(Mutex::new(Box::new(buf.clone()) as Box<_>));

        {
            let mut w = channel.lock().unwrap();
            write_record(
                &mut **w,
                &Record::Command(ControlCommand::new::<&str>(
                    opcodes::LOGOUT,
                    vec![],
                )),
            )
            .unwrap();
        }

        let wire = buf.0.lock().unwrap().clone();
        match read_record(&mut io::Cursor::new(wire)).unwrap() {
            Record::Command(cmd) => assert_eq!(opcodes::LOGOUT, cmd.opcode),
            r => panic!("Unexpected record: {:?}", r),
        }
    }

    #[test]
    fn oversized_length_prefix_rejected() {
        let mut wire = Vec::<u8>::new();
        wire.write_u32::<BigEndian>(MAX_RECORD_SIZE + 1).unwrap();
        wire.extend_from_slice(b"junk");

        assert_matches!(
            Err(crate::support::error::Error::FrameTooLarge),
            read_record(&mut io::Cursor::new(wire))
        );
    }

    #[test]
    fn eof_mid_record_is_io_error() {
        let mut wire = Vec::<u8>::new();
        wire.write_u32::<BigEndian>(64).unwrap();
        wire.extend_from_slice(b"short");

        assert_matches!(
            Err(crate::support::error::Error::Io(..)),
            read_record(&mut io::Cursor::new(wire))
        );
    }
}
