use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, Stream, StringFormat,
};

use super::{
    layout::{DrawOp, LayoutOptions, Page},
    metrics::{Weight, ELLIPSIS},
    RenderError,
};

const REGULAR_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";

pub fn encode(pages: &[Page], options: &LayoutOptions, title: &str) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(font("Helvetica"));
    let bold_id = doc.add_object(font("Helvetica-Bold"));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            REGULAR_FONT => regular_id,
            BOLD_FONT => bold_id,
        },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let content = Content {
            operations: page_operations(page),
        };
        let encoded = content
            .encode()
            .map_err(|error| RenderError::Encode(error.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let page_count = i64::try_from(kids.len()).map_err(|error| RenderError::Encode(error.to_string()))?;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                real(options.page_width),
                real(options.page_height),
            ],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(win_ansi(title), StringFormat::Literal),
        "Producer" => Object::String(b"ledgerdesk".to_vec(), StringFormat::Literal),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|error| RenderError::Encode(error.to_string()))?;
    Ok(bytes)
}

fn font(base: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn page_operations(page: &Page) -> Vec<Operation> {
    let mut operations = Vec::new();
    for op in &page.ops {
        match op {
            DrawOp::Text {
                x,
                y,
                size,
                weight,
                text,
            } => {
                let font = match weight {
                    Weight::Regular => REGULAR_FONT,
                    Weight::Bold => BOLD_FONT,
                };
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec![font.into(), real(*size)]));
                operations.push(Operation::new("Td", vec![real(*x), real(*y)]));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(win_ansi(text), StringFormat::Literal)],
                ));
                operations.push(Operation::new("ET", vec![]));
            }
            DrawOp::Line { from, to, width } => {
                operations.push(Operation::new("w", vec![real(*width)]));
                operations.push(Operation::new("m", vec![real(from.0), real(from.1)]));
                operations.push(Operation::new("l", vec![real(to.0), real(to.1)]));
                operations.push(Operation::new("S", vec![]));
            }
        }
    }
    operations
}

/// Latin-1 maps onto WinAnsi directly; a few typographic marks live in
/// 0x80..0x9F. Anything else becomes `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|character| match character {
            ELLIPSIS => 0x85,
            '€' => 0x80,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            ' '..='~' | '\u{a0}'..='\u{ff}' => character as u8,
            _ => b'?',
        })
        .collect()
}
