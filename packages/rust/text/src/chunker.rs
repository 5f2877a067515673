//! Fixed-size overlapping chunker with stable chunk identifiers.
//!
//! Windows are measured in characters, not bytes, and never cross a page
//! boundary. Identical input always produces identical chunk ids.

use tracing::debug;

use tenderfit_shared::{PageText, Result, TenderFitError, TextChunk};

/// Split pages into overlapping windows of `chunk_size` characters.
///
/// Each window after the first on a page starts `chunk_size - overlap`
/// characters after the previous start. The final partial window is kept.
/// `chunk_index` increases across the whole call; `chunk_id` restarts per page.
pub fn chunk_pages(pages: &[PageText], chunk_size: usize, overlap: usize) -> Result<Vec<TextChunk>> {
    if chunk_size == 0 {
        return Err(TenderFitError::validation("chunk_size must be positive"));
    }
    if overlap >= chunk_size {
        return Err(TenderFitError::validation(
            "overlap must be smaller than chunk_size",
        ));
    }

    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;

    for page in pages {
        for (local_index, piece) in windows(&page.text, chunk_size, overlap)
            .into_iter()
            .enumerate()
        {
            chunks.push(TextChunk {
                chunk_id: format!("p{}-c{}", page.page_num, local_index + 1),
                chunk_index,
                page_start: page.page_num,
                page_end: page.page_num,
                text: piece.to_string(),
            });
            chunk_index += 1;
        }
    }

    debug!(
        pages = pages.len(),
        chunks = chunks.len(),
        chunk_size,
        overlap,
        "chunked pages"
    );
    Ok(chunks)
}

/// Character windows over one page. Empty text yields no windows.
fn windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<&str> {
    // Byte offset of every char boundary, including the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let length = bounds.len() - 1;

    let mut out = Vec::new();
    let mut start = 0;
    while start < length {
        let end = (start + chunk_size).min(length);
        out.push(&text[bounds[start]..bounds[end]]);
        if end == length {
            break;
        }
        start = end - overlap;
    }
    out
}
