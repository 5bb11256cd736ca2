//! Minimal PDF writer for batch record documents.
//!
//! Emits PDF 1.4 with uncompressed content streams and the built-in
//! Helvetica fonts, which every conformant reader ships. Output is a
//! byte-exact function of its input, so a regenerated report for
//! unchanged data is identical.

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const LEADING: f32 = 14.0;
const BODY_SIZE: u32 = 9;
const TITLE_SIZE: u32 = 16;

/// One line of output. Headings switch to the bold face and a larger
/// size; a `Blank` consumes vertical space without drawing.
#[derive(Debug, Clone)]
pub enum Line {
    Title(String),
    Heading(String),
    Text(String),
    Blank,
}

/// Render lines into a complete PDF document, paginating as needed.
pub fn render(lines: &[Line]) -> Vec<u8> {
    let lines_per_page = ((PAGE_HEIGHT - 2.0 * MARGIN) / LEADING) as usize;
    let pages: Vec<&[Line]> = if lines.is_empty() {
        vec![&[][..]]
    } else {
        lines.chunks(lines_per_page).collect()
    };

    // Object layout: 1 catalog, 2 page tree, 3 regular font, 4 bold
    // font, then (page, content) pairs.
    let first_page_obj = 5usize;
    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", first_page_obj + i * 2))
        .collect();

    let mut objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        )
        .into_bytes(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>".to_vec(),
    ];

    for (i, page_lines) in pages.iter().enumerate() {
        let content_obj = first_page_obj + i * 2 + 1;
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {content_obj} 0 R >>"
            )
            .into_bytes(),
        );
        let stream = content_stream(page_lines);
        let mut body = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        body.extend_from_slice(stream.as_bytes());
        body.extend_from_slice(b"\nendstream");
        objects.push(body);
    }

    assemble(&objects)
}

fn content_stream(lines: &[Line]) -> String {
    let mut s = String::from("BT\n");
    s.push_str(&format!(
        "{} {} Td\n{LEADING} TL\n",
        MARGIN,
        PAGE_HEIGHT - MARGIN
    ));
    let mut current: Option<(u32, &str)> = None;
    for line in lines {
        let (size, font, text) = match line {
            Line::Title(t) => (TITLE_SIZE, "F2", t.as_str()),
            Line::Heading(t) => (BODY_SIZE + 2, "F2", t.as_str()),
            Line::Text(t) => (BODY_SIZE, "F1", t.as_str()),
            Line::Blank => {
                s.push_str("T*\n");
                continue;
            }
        };
        if current != Some((size, font)) {
            s.push_str(&format!("/{font} {size} Tf\n"));
            current = Some((size, font));
        }
        s.push_str(&format!("({}) Tj\nT*\n", escape_text(text)));
    }
    s.push_str("ET");
    s
}

/// PDF string syntax reserves backslash and parentheses; non-ASCII is
/// transcoded to WinAnsi where possible and dropped otherwise.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            c if c.is_ascii() && !c.is_control() => out.push(c),
            '°' => out.push_str("\\260"),
            _ => out.push('?'),
        }
    }
    out
}

fn assemble(objects: &[Vec<u8>]) -> Vec<u8> {
    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }
    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_wellformed_single_page_document() {
        let bytes = render(&[
            Line::Title("Batch Record".into()),
            Line::Blank,
            Line::Text("Product: Paracetamol 500mg".into()),
        ]);
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.ends_with("%%EOF\n"));
        assert!(text.contains("(Batch Record) Tj"));
        assert!(text.contains("/Count 1"));
    }

    #[test]
    fn paginates_long_documents() {
        let lines: Vec<Line> = (0..200).map(|i| Line::Text(format!("row {i}"))).collect();
        let text = String::from_utf8(render(&lines)).unwrap();
        assert!(text.contains("/Count 4"));
        assert!(text.contains("(row 199) Tj"));
    }

    #[test]
    fn escapes_reserved_characters() {
        let text = String::from_utf8(render(&[Line::Text("a (b) \\c 65 °C".into())])).unwrap();
        assert!(text.contains("(a \\(b\\) \\\\c 65 \\260C) Tj"));
    }

    #[test]
    fn output_is_deterministic() {
        let lines = [Line::Title("T".into()), Line::Text("x".into())];
        assert_eq!(render(&lines), render(&lines));
    }
}
