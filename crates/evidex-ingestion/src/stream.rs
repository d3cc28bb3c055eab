//! Incremental splitter for bulk PubMed XML dumps.
//!
//! A push parser over byte chunks that emits one complete
//! `<PubmedArticle>…</PubmedArticle>` string at a time. It tracks element
//! depth to guard against nested occurrences and retains only the tail
//! buffer needed to complete an open element, so a multi-gigabyte dump is
//! never resident in memory.

use tracing::warn;

const OPEN_TAG: &[u8] = b"<PubmedArticle";
const CLOSE_TAG: &[u8] = b"</PubmedArticle>";

pub struct ArticleStream {
    buf: Vec<u8>,
    /// Scan resume offset into `buf`; bytes before it are already examined.
    scan_pos: usize,
    /// Nesting depth of `<PubmedArticle>`; 0 means between articles.
    depth: usize,
}

impl ArticleStream {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            scan_pos: 0,
            depth: 0,
        }
    }

    /// Feed the next chunk of bytes; returns every article completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            if self.depth == 0 {
                match find_open_tag(&self.buf, self.scan_pos) {
                    Some(start) => {
                        // Discard inter-article bytes (set wrapper, DTD, whitespace).
                        self.buf.drain(..start);
                        self.scan_pos = OPEN_TAG.len();
                        self.depth = 1;
                    }
                    None => {
                        // Keep only a tail that could hold a split-open tag.
                        let cut = self.buf.len().saturating_sub(OPEN_TAG.len());
                        self.buf.drain(..cut);
                        self.scan_pos = 0;
                        return out;
                    }
                }
            }

            // Inside an article: advance over opens and closes until depth 0.
            match self.next_tag() {
                Some(TagHit::Open(end)) => {
                    self.depth += 1;
                    self.scan_pos = end;
                }
                Some(TagHit::Close(end)) => {
                    self.depth -= 1;
                    self.scan_pos = end;
                    if self.depth == 0 {
                        let article: Vec<u8> = self.buf.drain(..end).collect();
                        out.push(String::from_utf8_lossy(&article).into_owned());
                        self.scan_pos = 0;
                    }
                }
                None => {
                    // Unfinished article: keep everything, resume past the
                    // scanned region minus a margin for a split tag.
                    self.scan_pos = self.buf.len().saturating_sub(CLOSE_TAG.len());
                    return out;
                }
            }
        }
    }

    /// Signal end of input. An element still open at EOF is discarded with a
    /// warning; a truncated article is never emitted.
    pub fn finish(self) {
        if self.depth > 0 {
            warn!(
                buffered_bytes = self.buf.len(),
                "bulk XML stream ended inside an open <PubmedArticle>; discarding partial article"
            );
        }
    }

    fn next_tag(&self) -> Option<TagHit> {
        let open = find_open_tag(&self.buf, self.scan_pos);
        let close = find(&self.buf, CLOSE_TAG, self.scan_pos);
        match (open, close) {
            (Some(o), Some(c)) if o < c => Some(TagHit::Open(o + OPEN_TAG.len())),
            (_, Some(c)) => Some(TagHit::Close(c + CLOSE_TAG.len())),
            (Some(o), None) => Some(TagHit::Open(o + OPEN_TAG.len())),
            (None, None) => None,
        }
    }
}

impl Default for ArticleStream {
    fn default() -> Self {
        Self::new()
    }
}

enum TagHit {
    /// Offset just past the matched open tag name.
    Open(usize),
    /// Offset just past the full close tag.
    Close(usize),
}

/// Locate `<PubmedArticle` followed by a name boundary, so that
/// `<PubmedArticleSet>` never matches.
fn find_open_tag(haystack: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(i) = find(haystack, OPEN_TAG, pos) {
        match haystack.get(i + OPEN_TAG.len()) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => return Some(i),
            // End of buffer: treat as not-yet-decidable (caller retains tail).
            None => return None,
            _ => pos = i + 1,
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Split an in-memory XML document into per-article strings.
pub fn extract_articles(xml: &str) -> Vec<String> {
    let mut stream = ArticleStream::new();
    let articles = stream.push(xml.as_bytes());
    stream.finish();
    articles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(pmid: &str) -> String {
        format!(
            "<PubmedArticle><MedlineCitation><PMID>{pmid}</PMID></MedlineCitation></PubmedArticle>"
        )
    }

    #[test]
    fn test_extracts_every_article_from_a_set() {
        let xml = format!(
            "<?xml version=\"1.0\"?>\n<PubmedArticleSet>{}{}{}</PubmedArticleSet>",
            article("1"),
            article("2"),
            article("3")
        );
        let articles = extract_articles(&xml);
        assert_eq!(articles.len(), 3);
        assert!(articles[0].contains("<PMID>1</PMID>"));
        assert!(articles[2].contains("<PMID>3</PMID>"));
    }

    #[test]
    fn test_set_wrapper_tag_does_not_match() {
        let xml = "<PubmedArticleSet></PubmedArticleSet>";
        assert!(extract_articles(xml).is_empty());
    }

    #[test]
    fn test_article_split_across_pushes() {
        let full = article("12345678");
        let (a, b) = full.split_at(30);

        let mut stream = ArticleStream::new();
        assert!(stream.push(a.as_bytes()).is_empty());
        let done = stream.push(b.as_bytes());
        assert_eq!(done.len(), 1);
        assert_eq!(done[0], full);
        stream.finish();
    }

    #[test]
    fn test_tag_split_at_chunk_boundary() {
        let full = format!("{}{}", article("1"), article("2"));
        // Split in the middle of the second article's close tag.
        let cut = full.len() - 7;
        let mut stream = ArticleStream::new();
        let mut out = stream.push(full[..cut].as_bytes());
        out.extend(stream.push(full[cut..].as_bytes()));
        assert_eq!(out.len(), 2);
        stream.finish();
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let full = format!("<PubmedArticleSet>{}{}</PubmedArticleSet>", article("9"), article("10"));
        let mut stream = ArticleStream::new();
        let mut out = Vec::new();
        for b in full.as_bytes() {
            out.extend(stream.push(std::slice::from_ref(b)));
        }
        assert_eq!(out.len(), 2);
        stream.finish();
    }

    #[test]
    fn test_open_element_at_eof_is_discarded() {
        let mut stream = ArticleStream::new();
        let out = stream.push(b"<PubmedArticleSet><PubmedArticle><MedlineCitation>");
        assert!(out.is_empty());
        // finish() must not emit the truncated article.
        stream.finish();
    }

    #[test]
    fn test_inter_article_noise_is_dropped() {
        let xml = format!(
            "<!DOCTYPE PubmedArticleSet SYSTEM \"pubmed.dtd\">\n{}\n  \n{}",
            article("1"),
            article("2")
        );
        let articles = extract_articles(&xml);
        assert_eq!(articles.len(), 2);
        assert!(articles[0].starts_with("<PubmedArticle>"));
    }
}
