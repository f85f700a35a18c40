//! Composite tables for multi-part icons.
//!
//! A multi-part icon (frames such as `qtg_fr_popup_9P`) is stored as one
//! blob holding a copy of every piece together with its placement, so the
//! piece resources can be released once the composite exists.
//!
//! ```text
//! [0: header_len u32][4: header, wire-encoded Vec<CompositePiece>][data...]
//! ```
//!
//! Each piece's `data_offset` is relative to the start of the data area.

use theme_ipc::{IconFormat, IpcResult, RectF, SizeF, Wire, WireReader, WireWriter};

use crate::error::{ResourceError, ResourceResult};

/// Placement and payload location of one piece.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositePiece {
    pub format: IconFormat,
    pub source: RectF,
    pub target: RectF,
    pub size: SizeF,
    pub data_offset: u32,
    pub data_len: u32,
}

impl Wire for CompositePiece {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.format as i32);
        w.put(&self.source);
        w.put(&self.target);
        w.put(&self.size);
        w.put_u32(self.data_offset);
        w.put_u32(self.data_len);
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        Ok(Self {
            format: IconFormat::try_from(r.get_i32()?)?,
            source: r.get()?,
            target: r.get()?,
            size: r.get()?,
            data_offset: r.get_u32()?,
            data_len: r.get_u32()?,
        })
    }
}

/// A piece ready to be packed.
#[derive(Debug, Clone)]
pub struct PieceData<'a> {
    pub format: IconFormat,
    pub source: RectF,
    pub target: RectF,
    pub size: SizeF,
    pub bytes: &'a [u8],
}

fn too_large(n: usize) -> ResourceError {
    ResourceError::TooLarge(n)
}

/// Pack pieces into one composite blob.
pub fn encode_composite(pieces: &[PieceData<'_>]) -> ResourceResult<Vec<u8>> {
    let mut data = Vec::new();
    let mut header = Vec::with_capacity(pieces.len());
    for piece in pieces {
        header.push(CompositePiece {
            format: piece.format,
            source: piece.source,
            target: piece.target,
            size: piece.size,
            data_offset: u32::try_from(data.len()).map_err(|_| too_large(data.len()))?,
            data_len: u32::try_from(piece.bytes.len()).map_err(|_| too_large(piece.bytes.len()))?,
        });
        data.extend_from_slice(piece.bytes);
    }

    let mut w = WireWriter::new();
    w.put_seq(&header);
    let header = w.into_bytes();

    let header_len = u32::try_from(header.len()).map_err(|_| too_large(header.len()))?;
    let mut out = Vec::with_capacity(4 + header.len() + data.len());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Borrowed view of a composite blob.
#[derive(Debug, Clone)]
pub struct CompositeView<'a> {
    pub pieces: Vec<CompositePiece>,
    data: &'a [u8],
}

impl<'a> CompositeView<'a> {
    pub fn parse(bytes: &'a [u8]) -> ResourceResult<Self> {
        let malformed = |what: &str| ResourceError::Malformed(format!("composite: {}", what));

        let len_bytes: [u8; 4] = bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| malformed("short"))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_end = 4usize
            .checked_add(header_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| malformed("header past end"))?;

        let mut r = WireReader::new(&bytes[4..header_end]);
        let pieces: Vec<CompositePiece> = r
            .get_seq()
            .map_err(|e| ResourceError::Malformed(e.to_string()))?;
        r.finish()
            .map_err(|e| ResourceError::Malformed(e.to_string()))?;

        let data = &bytes[header_end..];
        for piece in &pieces {
            let end = piece.data_offset as usize + piece.data_len as usize;
            if end > data.len() {
                return Err(malformed("piece past end"));
            }
        }
        Ok(Self { pieces, data })
    }

    /// Payload of piece `index`.
    pub fn piece_bytes(&self, index: usize) -> Option<&'a [u8]> {
        let piece = self.pieces.get(index)?;
        let start = piece.data_offset as usize;
        self.data.get(start..start + piece.data_len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece<'a>(bytes: &'a [u8], x: f32) -> PieceData<'a> {
        PieceData {
            format: IconFormat::Svg,
            source: RectF::new(0.0, 0.0, 10.0, 10.0),
            target: RectF::new(x, 0.0, 10.0, 10.0),
            size: SizeF::new(10.0, 10.0),
            bytes,
        }
    }

    #[test]
    fn test_three_piece_composite() {
        let blob = encode_composite(&[piece(b"left", 0.0), piece(b"center", 10.0), piece(b"r", 20.0)])
            .unwrap();
        let view = CompositeView::parse(&blob).unwrap();

        assert_eq!(view.pieces.len(), 3);
        assert_eq!(view.piece_bytes(0), Some(&b"left"[..]));
        assert_eq!(view.piece_bytes(1), Some(&b"center"[..]));
        assert_eq!(view.piece_bytes(2), Some(&b"r"[..]));
        assert_eq!(view.pieces[2].target.x, 20.0);
        assert!(view.piece_bytes(3).is_none());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let blob = encode_composite(&[piece(b"payload", 0.0)]).unwrap();
        assert!(CompositeView::parse(&blob[..blob.len() - 1]).is_err());
        assert!(CompositeView::parse(&blob[..2]).is_err());
    }
}
