//! División recursiva de texto en chunks solapados.
//!
//! Se intenta cortar primero por párrafos, luego por líneas, frases y
//! palabras, y como último recurso por caracteres. Las longitudes se miden en
//! caracteres (no bytes), así que nunca se corta un carácter UTF-8.

use crate::config::ChunkingConfig;

const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "? ", " ", ""];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Divisor de texto configurado con tamaño y solapamiento.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            chunk_overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1)),
        }
    }

    /// Devuelve los chunks en orden de aparición. Texto vacío → sin chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Primer separador presente en el texto; "" siempre coincide.
        let (position, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map(|(i, sep)| (i, *sep))
            .unwrap_or((separators.len(), ""));
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        for piece in pieces {
            if char_len(&piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, remaining));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }
        chunks
    }

    /// Une piezas pequeñas en ventanas de hasta `chunk_size` caracteres,
    /// arrastrando hasta `chunk_overlap` caracteres de la ventana anterior.
    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        let joined_len = |window_len: usize, total: usize| {
            if window_len > 0 {
                total + sep_len
            } else {
                total
            }
        };

        for piece in pieces {
            let len = char_len(piece);
            if joined_len(window.len(), total) + len > self.chunk_size {
                if !window.is_empty() {
                    push_trimmed(&mut docs, &window.join(separator));

                    while total > self.chunk_overlap
                        || (total > 0 && joined_len(window.len(), total) + len > self.chunk_size)
                    {
                        let removed = char_len(window[0]);
                        total -= removed + if window.len() > 1 { sep_len } else { 0 };
                        window.remove(0);
                    }
                }
            }
            total += len + if window.is_empty() { 0 } else { sep_len };
            window.push(piece);
        }
        if !window.is_empty() {
            push_trimmed(&mut docs, &window.join(separator));
        }
        docs
    }
}

fn push_trimmed(docs: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}
