//! Length-prefixed framing for problems and results.
//!
//! Both frame kinds are a fixed 16-byte header followed by a variable
//! payload. The header starts with the total frame length as a
//! pointer-width native-endian integer, so the payload begins on a
//! 16-byte boundary. Both ends of a pipe are the same build running on
//! the same host; there is no schema negotiation and no resynchronization
//! after a malformed frame.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LEN_BYTES: usize = std::mem::size_of::<usize>();

/// Size of the fixed problem header: frame length, kind, id, nvars, var.
pub const PROBLEM_HEADER_LEN: usize = LEN_BYTES + 8;

/// Size of the fixed result header: frame length, id, failure flag, padding.
pub const RESULT_HEADER_LEN: usize = LEN_BYTES + 8;

/// Sanity bound on a frame length. Anything larger is a protocol violation,
/// not a real problem or result.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Errors produced by the wire codec. All of them are fatal for the stream
/// they occurred on.
#[derive(Debug, Error)]
pub enum WireError {
    /// The stream ended before a complete header or payload was read.
    #[error("truncated frame")]
    Truncated,

    /// The header announced a length below the header size or above
    /// [`MAX_FRAME_LEN`].
    #[error("invalid frame length {0}")]
    InvalidLength(usize),

    /// An I/O failure on the underlying pipe.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A problem to be solved, in one of its variant forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Problem kind tag; selects the solver.
    pub kind: u16,
    /// Identifier, unique for the lifetime of the logical problem.
    pub id: u16,
    /// Number of variant forms that exist for this problem.
    pub nvars: u16,
    /// Which variant form this instance represents (`< nvars` when
    /// `nvars > 0`).
    pub var: u16,
    /// Kind-specific payload bytes.
    pub payload: Vec<u8>,
}

impl Problem {
    /// Total encoded size of this problem, header included.
    pub fn frame_len(&self) -> usize {
        PROBLEM_HEADER_LEN + self.payload.len()
    }
}

/// The outcome of one solution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkResult {
    /// Identifier of the problem this result claims to solve.
    pub id: u16,
    /// Set when the attempt failed or was cancelled; the payload is empty
    /// in that case.
    pub failed: bool,
    /// Kind-specific solution payload bytes.
    pub payload: Vec<u8>,
}

impl WorkResult {
    /// Total encoded size of this result, header included.
    pub fn frame_len(&self) -> usize {
        RESULT_HEADER_LEN + self.payload.len()
    }
}

fn read_err(err: std::io::Error) -> WireError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::Truncated
    } else {
        WireError::Io(err)
    }
}

fn ne_usize(bytes: &[u8]) -> usize {
    let mut raw = [0u8; LEN_BYTES];
    raw.copy_from_slice(&bytes[..LEN_BYTES]);
    usize::from_ne_bytes(raw)
}

fn ne_u16(bytes: &[u8]) -> u16 {
    u16::from_ne_bytes([bytes[0], bytes[1]])
}

fn check_len(len: usize, header_len: usize) -> Result<usize, WireError> {
    if len < header_len || len > MAX_FRAME_LEN {
        return Err(WireError::InvalidLength(len));
    }
    Ok(len - header_len)
}

/// Write one problem frame: header first, flush, then the payload, flush.
pub async fn write_problem<W>(writer: &mut W, prob: &Problem) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; PROBLEM_HEADER_LEN];
    header[..LEN_BYTES].copy_from_slice(&prob.frame_len().to_ne_bytes());
    header[LEN_BYTES..LEN_BYTES + 2].copy_from_slice(&prob.kind.to_ne_bytes());
    header[LEN_BYTES + 2..LEN_BYTES + 4].copy_from_slice(&prob.id.to_ne_bytes());
    header[LEN_BYTES + 4..LEN_BYTES + 6].copy_from_slice(&prob.nvars.to_ne_bytes());
    header[LEN_BYTES + 6..LEN_BYTES + 8].copy_from_slice(&prob.var.to_ne_bytes());
    writer.write_all(&header).await?;
    writer.flush().await?;
    writer.write_all(&prob.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one problem frame. Failure means the stream is unusable.
pub async fn read_problem<R>(reader: &mut R) -> Result<Problem, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; PROBLEM_HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(read_err)?;
    let payload_len = check_len(ne_usize(&header), PROBLEM_HEADER_LEN)?;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await.map_err(read_err)?;
    Ok(Problem {
        kind: ne_u16(&header[LEN_BYTES..]),
        id: ne_u16(&header[LEN_BYTES + 2..]),
        nvars: ne_u16(&header[LEN_BYTES + 4..]),
        var: ne_u16(&header[LEN_BYTES + 6..]),
        payload,
    })
}

/// Write one result frame: header first, flush, then the payload, flush.
pub async fn write_result<W>(writer: &mut W, result: &WorkResult) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; RESULT_HEADER_LEN];
    header[..LEN_BYTES].copy_from_slice(&result.frame_len().to_ne_bytes());
    header[LEN_BYTES..LEN_BYTES + 2].copy_from_slice(&result.id.to_ne_bytes());
    header[LEN_BYTES + 2] = u8::from(result.failed);
    writer.write_all(&header).await?;
    writer.flush().await?;
    writer.write_all(&result.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one result frame. Failure means the stream is unusable.
pub async fn read_result<R>(reader: &mut R) -> Result<WorkResult, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RESULT_HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(read_err)?;
    let payload_len = check_len(ne_usize(&header), RESULT_HEADER_LEN)?;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await.map_err(read_err)?;
    Ok(WorkResult {
        id: ne_u16(&header[LEN_BYTES..]),
        failed: header[LEN_BYTES + 2] != 0,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn problem_round_trip_preserves_fields_and_payload() {
        let prob = Problem {
            kind: 2,
            id: 7,
            nvars: 4,
            var: 3,
            payload: vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x11],
        };
        let mut buf = Cursor::new(Vec::new());
        write_problem(&mut buf, &prob).await.unwrap();
        assert_eq!(buf.get_ref().len(), prob.frame_len());

        let mut rd = Cursor::new(buf.into_inner());
        let got = read_problem(&mut rd).await.unwrap();
        assert_eq!(got, prob);
    }

    #[tokio::test]
    async fn result_round_trip_with_empty_payload() {
        let result = WorkResult {
            id: 9,
            failed: true,
            payload: Vec::new(),
        };
        let mut buf = Cursor::new(Vec::new());
        write_result(&mut buf, &result).await.unwrap();

        let mut rd = Cursor::new(buf.into_inner());
        let got = read_result(&mut rd).await.unwrap();
        assert_eq!(got, result);
    }

    #[tokio::test]
    async fn undersized_frame_length_is_rejected() {
        let mut header = [0u8; PROBLEM_HEADER_LEN];
        header[..LEN_BYTES].copy_from_slice(&4usize.to_ne_bytes());
        let mut rd = Cursor::new(header.to_vec());
        assert!(matches!(
            read_problem(&mut rd).await,
            Err(WireError::InvalidLength(4))
        ));
    }

    #[tokio::test]
    async fn oversized_frame_length_is_rejected() {
        let mut header = [0u8; RESULT_HEADER_LEN];
        header[..LEN_BYTES].copy_from_slice(&(MAX_FRAME_LEN + 1).to_ne_bytes());
        let mut rd = Cursor::new(header.to_vec());
        assert!(matches!(
            read_result(&mut rd).await,
            Err(WireError::InvalidLength(_))
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_detected() {
        let prob = Problem {
            kind: 1,
            id: 1,
            nvars: 1,
            var: 0,
            payload: vec![1, 2, 3, 4],
        };
        let mut buf = Cursor::new(Vec::new());
        write_problem(&mut buf, &prob).await.unwrap();
        let mut bytes = buf.into_inner();
        bytes.truncate(bytes.len() - 2);

        let mut rd = Cursor::new(bytes);
        assert!(matches!(
            read_problem(&mut rd).await,
            Err(WireError::Truncated)
        ));
    }

    #[tokio::test]
    async fn truncated_header_is_detected() {
        let mut rd = Cursor::new(vec![0u8; PROBLEM_HEADER_LEN - 1]);
        assert!(matches!(
            read_problem(&mut rd).await,
            Err(WireError::Truncated)
        ));
    }
}
