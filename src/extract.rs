//! Extracción de texto plano según el tipo de fichero (PDF, DOCX, TXT).

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use docx_rs::{read_docx, DocumentChild};
use tracing::debug;

/// Tipos de documento admitidos en la subida.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Txt,
}

impl DocumentKind {
    /// Deduce el tipo a partir de la extensión (sin distinguir mayúsculas).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = Path::new(filename).extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }

    /// Extrae el texto del fichero, uniendo páginas o párrafos con una línea
    /// en blanco. Es bloqueante: llamar desde `spawn_blocking`.
    pub fn extract(self, path: &Path) -> Result<String> {
        let text = match self {
            Self::Pdf => extract_pdf(path)?,
            Self::Docx => extract_docx(path)?,
            Self::Txt => std::fs::read_to_string(path)
                .with_context(|| format!("El fichero {} no es texto UTF-8 válido", path.display()))?,
        };
        debug!("Extraídos {} caracteres de {}", text.chars().count(), path.display());
        Ok(text)
    }
}

fn extract_pdf(path: &Path) -> Result<String> {
    let raw = pdf_extract::extract_text(path)
        .map_err(|e| anyhow!("No se pudo extraer texto del PDF: {e}"))?;
    // pdf-extract separa las páginas con saltos de página.
    let pages: Vec<&str> = raw
        .split('\u{c}')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect();
    Ok(pages.join("\n\n"))
}

fn extract_docx(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("No se pudo leer el DOCX {}", path.display()))?;
    let docx = read_docx(&bytes).map_err(|e| anyhow!("Error parseando DOCX: {e}"))?;

    let paragraphs: Vec<String> = docx
        .document
        .children
        .iter()
        .filter_map(|child| match child {
            DocumentChild::Paragraph(p) => Some(p.raw_text()),
            _ => None,
        })
        .filter(|text| !text.trim().is_empty())
        .collect();
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn kind_is_derived_from_extension() {
        assert_eq!(DocumentKind::from_filename("informe.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_filename("notas.docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_filename("a.b.txt"), Some(DocumentKind::Txt));
        assert_eq!(DocumentKind::from_filename("setup.exe"), None);
        assert_eq!(DocumentKind::from_filename("sin_extension"), None);
    }

    #[test]
    fn txt_extraction_reads_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Contenido de prueba\n\ncon acentos: canción").unwrap();
        let text = DocumentKind::Txt.extract(file.path()).unwrap();
        assert!(text.contains("canción"));
    }

    #[test]
    fn txt_extraction_rejects_invalid_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0x00]).unwrap();
        assert!(DocumentKind::Txt.extract(file.path()).is_err());
    }

    #[test]
    fn corrupt_docx_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a zip").unwrap();
        assert!(DocumentKind::Docx.extract(file.path()).is_err());
    }
}
