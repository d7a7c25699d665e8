use crate::protocol::messages::{MmcRes, ResultMode, MAX_RESULT_MSG};

/// Payload bytes per chunk; the last byte of each wire slot is the terminator.
pub const CHUNK_LEN: usize = MAX_RESULT_MSG - 1;

/// Splits `payload` into chunks of at most [`CHUNK_LEN`] bytes, never inside a
/// UTF-8 character. An empty payload yields one empty chunk.
pub fn split_result(payload: &str) -> Vec<&str> {
    if payload.is_empty() {
        return vec![""];
    }
    let mut chunks = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let mut end = rest.len().min(CHUNK_LEN);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

/// `AS_MMC_RES` packets for one payload: `R_CONTINUE` chunks, the last one marked `last_mode`.
pub fn result_messages(ext_id: u32, payload: &str, last_mode: ResultMode) -> Vec<MmcRes> {
    let chunks = split_result(payload);
    let count = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| MmcRes {
            id: ext_id,
            result_mode: if i + 1 == count { last_mode } else { ResultMode::Continue },
            result: chunk.to_string(),
        })
        .collect()
}
