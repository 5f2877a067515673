//! Page text acquisition, chunking, and append-only extraction logs.
//!
//! Pages come from a [`PageSource`] (pdftotext or plain text), are split into
//! overlapping [`TextChunk`]s by [`chunk_pages`], and are recorded row by row
//! in `pages.jsonl` / `chunks.jsonl` via [`JsonlWriter`].

mod chunker;
mod jsonl;
mod pages;

pub use chunker::chunk_pages;
pub use jsonl::{JsonlWriter, read_jsonl};
pub use pages::{AutoPageSource, PageSource, PdftotextSource, PlainTextSource};

pub use tenderfit_shared::{PageText, TextChunk};
