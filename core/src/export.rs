//! Encoder for the Nix "Export" envelope.
//!
//! Fetched NAR bytes are not directly importable: `nix-store --import`
//! expects a path's NAR bytes followed by a small framed trailer carrying
//! the path, its references and deriver. The teacher never needs this
//! (it imports through `libnixstore` FFI directly), so this is grounded
//! instead on the documented legacy export wire format, e.g.
//! `nixrs-store/src/legacy_local_store.rs`'s `export_path`/`import_paths`
//! and `nixrs-util/src/io/write_string.rs`'s string framing.

use std::io::{self, Write};

use crate::nix_store::StorePath;

/// Magic number preceding the trailer of an export record.
pub const EXPORT_MAGIC: u64 = 0x4558494e;

/// Writes the Nix wire string framing: a u64-LE length prefix, the raw
/// bytes, then zero padding up to the next 8-byte boundary.
fn write_wire_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u64).to_le_bytes())?;
    w.write_all(bytes)?;

    let padding = calc_padding(bytes.len() as u64);
    if padding > 0 {
        w.write_all(&[0u8; 8][..padding as usize])?;
    }
    Ok(())
}

fn calc_padding(size: u64) -> u8 {
    if size % 8 > 0 {
        8 - (size % 8) as u8
    } else {
        0
    }
}

/// Writes a complete export record: `nar_bytes` followed by the trailer
/// describing `path`, its `references` and optional `deriver`.
///
/// The trailer carries no signature (the transfer engine does not verify
/// or forward narinfo signatures into the local store) and terminates the
/// export stream (a single record per `nix-store --import` invocation).
pub fn write_export<W: Write>(
    w: &mut W,
    store_dir_prefix: &str,
    nar_bytes: &[u8],
    path: &StorePath,
    references: &[StorePath],
    deriver: Option<&StorePath>,
) -> io::Result<()> {
    w.write_all(nar_bytes)?;

    w.write_all(&EXPORT_MAGIC.to_le_bytes())?;

    let full_path = format!("{}/{}", store_dir_prefix.trim_end_matches('/'), path);
    write_wire_string(w, &full_path)?;

    w.write_all(&(references.len() as u64).to_le_bytes())?;
    for r in references {
        let full_ref = format!("{}/{}", store_dir_prefix.trim_end_matches('/'), r);
        write_wire_string(w, &full_ref)?;
    }

    match deriver {
        Some(d) => {
            let full_deriver = format!("{}/{}", store_dir_prefix.trim_end_matches('/'), d);
            write_wire_string(w, &full_deriver)?;
        }
        None => write_wire_string(w, "")?,
    }

    // No signatures.
    w.write_all(&0u64.to_le_bytes())?;
    // Terminator: no further export records follow in this stream.
    w.write_all(&0u64.to_le_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sp(name: &str) -> StorePath {
        StorePath::from_base_name(PathBuf::from(name)).unwrap()
    }

    #[test]
    fn writes_magic_and_terminator() {
        let path = sp("ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5");
        let refs = vec![sp("0d71ygfwbmy1xjlbj1v027dfmy9cqavy-libffi-3.3")];
        let mut buf = Vec::new();
        write_export(&mut buf, "/nix/store", b"nar-bytes", &path, &refs, None).unwrap();

        assert!(buf.starts_with(b"nar-bytes"));

        let magic_offset = b"nar-bytes".len();
        let magic = u64::from_le_bytes(buf[magic_offset..magic_offset + 8].try_into().unwrap());
        assert_eq!(magic, EXPORT_MAGIC);

        // Last 16 bytes: signature-count (0) then terminator (0).
        let tail = &buf[buf.len() - 16..];
        assert_eq!(tail, &[0u8; 16]);
    }

    #[test]
    fn wire_string_pads_to_8_bytes() {
        let mut buf = Vec::new();
        write_wire_string(&mut buf, "abc").unwrap();
        // 8 (length) + 3 (data) + 5 (padding) = 16
        assert_eq!(buf.len(), 16);
    }
}
