//! The 8-byte file header: `GODB` magic, version, flags, two reserved bytes.

use crate::core::error::{Error, Result};
use std::io::{Read, Write};

pub const MAGIC: [u8; 4] = *b"GODB";
pub const CURRENT_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags: u8,
}

impl Header {
    pub fn current() -> Self {
        Header {
            version: CURRENT_VERSION,
            flags: 0,
        }
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&MAGIC)?;
        w.write_all(&[self.version, self.flags, 0, 0])?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        r.read_exact(&mut buf)?;
        if buf[0..4] != MAGIC {
            return Err(Error::invalid_format("bad magic bytes in file header"));
        }
        let version = buf[4];
        if version != CURRENT_VERSION {
            return Err(Error::invalid_format(format!(
                "unsupported file version {version}"
            )));
        }
        Ok(Header {
            version,
            flags: buf[5],
        })
    }
}
