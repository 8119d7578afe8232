//! Text measurement for the two standard fonts the reports use.
//!
//! Widths are the Adobe AFM advance widths (1/1000 em) for Helvetica and
//! Helvetica-Bold under WinAnsiEncoding, printable ASCII only. Accented
//! Latin letters measure as their base letter, which matches the AFM data
//! for every accent the reports print.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    Regular,
    Bold,
}

pub const ELLIPSIS: char = '…';

const FALLBACK_WIDTH: u32 = 556;
const ELLIPSIS_WIDTH: u32 = 1000;

// Codes 32..=126.
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, // '0'..'?'
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, // 'P'..'_'
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, // '`'..'o'
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, // 'p'..'~'
];

fn fold_accent(character: char) -> char {
    match character {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        '\u{a0}' => ' ',
        other => other,
    }
}

fn char_units(character: char, weight: Weight) -> u32 {
    if character == ELLIPSIS {
        return ELLIPSIS_WIDTH;
    }
    let code = fold_accent(character) as u32;
    if !(32..=126).contains(&code) {
        return FALLBACK_WIDTH;
    }
    let table = match weight {
        Weight::Regular => &HELVETICA,
        Weight::Bold => &HELVETICA_BOLD,
    };
    u32::from(table[(code - 32) as usize])
}

fn units(text: &str, weight: Weight) -> u32 {
    text.chars().map(|character| char_units(character, weight)).sum()
}

/// Rendered width of `text` in points at `size`.
pub fn measure(text: &str, size: f64, weight: Weight) -> f64 {
    f64::from(units(text, weight)) * size / 1000.0
}

/// Longest prefix of `text` that, followed by an ellipsis, fits in
/// `max_width`. Text that already fits is returned unchanged; a width too
/// narrow for the ellipsis alone yields an empty string.
pub fn clip(text: &str, max_width: f64, size: f64, weight: Weight) -> String {
    if measure(text, size, weight) <= max_width {
        return text.to_string();
    }
    let ellipsis = char_units(ELLIPSIS, weight);
    if (f64::from(ellipsis) * size / 1000.0) > max_width {
        return String::new();
    }

    // prefix[k] = width units of the first k chars; fits(k) is monotone in k.
    let mut prefix = Vec::with_capacity(text.len() + 1);
    prefix.push(0u32);
    for character in text.chars() {
        let last = prefix.last().copied().unwrap_or(0);
        prefix.push(last + char_units(character, weight));
    }
    let fits = |k: usize| f64::from(prefix[k] + ellipsis) * size / 1000.0 <= max_width;

    let (mut low, mut high) = (0usize, prefix.len() - 1);
    while low < high {
        let mid = (low + high + 1) / 2;
        if fits(mid) {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    let mut clipped = text.chars().take(low).collect::<String>();
    clipped.push(ELLIPSIS);
    clipped
}

/// Greedy word packing. A word wider than `width` sits alone on its line
/// and is never split.
pub fn wrap_to_width(text: &str, width: f64, size: f64, weight: Weight) -> Vec<String> {
    let space = char_units(' ', weight);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_units = 0u32;
    for word in text.split_whitespace() {
        let word_units = units(word, weight);
        if current.is_empty() {
            current.push_str(word);
            current_units = word_units;
            continue;
        }
        let candidate = current_units + space + word_units;
        if f64::from(candidate) * size / 1000.0 <= width {
            current.push(' ');
            current.push_str(word);
            current_units = candidate;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_units = word_units;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::{clip, measure, wrap_to_width, Weight, ELLIPSIS};

    const SIZE: f64 = 10.0;

    #[test]
    fn measures_with_afm_widths() {
        assert_eq!(measure("A", 1000.0, Weight::Regular), 667.0);
        assert_eq!(measure("i", 1000.0, Weight::Regular), 222.0);
        assert_eq!(measure("i", 1000.0, Weight::Bold), 278.0);
        assert_eq!(measure("Rápido", SIZE, Weight::Regular), measure("Rapido", SIZE, Weight::Regular));
        assert_eq!(measure("…", 1000.0, Weight::Regular), 1000.0);
        assert_eq!(measure("", SIZE, Weight::Regular), 0.0);
    }

    #[test]
    fn clips_to_the_longest_fitting_prefix() {
        let text = "Transporte Rápido LTDA";
        let limit = measure("Transp…", SIZE, Weight::Regular);
        let clipped = clip(text, limit, SIZE, Weight::Regular);
        assert_eq!(clipped, "Transp…");
        assert!(measure(&clipped, SIZE, Weight::Regular) <= limit);

        let one_more = measure("Transpo…", SIZE, Weight::Regular);
        assert!(one_more > limit);
    }

    #[test]
    fn clip_keeps_text_that_fits() {
        let text = "Som e luz";
        let width = measure(text, SIZE, Weight::Bold);
        assert_eq!(clip(text, width, SIZE, Weight::Bold), text);
    }

    #[test]
    fn clip_is_bounded_for_every_width() {
        let text = "Locação de equipamentos Ltda";
        let full = measure(text, SIZE, Weight::Regular);
        let minimum = measure("…", SIZE, Weight::Regular);
        let mut width = minimum;
        while width <= full + 5.0 {
            let clipped = clip(text, width, SIZE, Weight::Regular);
            assert!(clipped.chars().count() <= text.chars().count());
            assert!(measure(&clipped, SIZE, Weight::Regular) <= width, "width {width}");
            if full <= width {
                assert_eq!(clipped, text);
            } else {
                assert!(clipped.ends_with(ELLIPSIS));
            }
            width += 0.5;
        }
        assert_eq!(clip(text, minimum - 0.1, SIZE, Weight::Regular), "");
    }

    #[test]
    fn wrap_reproduces_the_words() {
        let text = "Montagem e desmontagem do estande principal no pavilhão azul";
        let widest = text
            .split_whitespace()
            .map(|word| measure(word, SIZE, Weight::Regular))
            .fold(0.0, f64::max);
        for extra in [0.0, 10.0, 40.0, 400.0] {
            let width = widest + extra;
            let lines = wrap_to_width(text, width, SIZE, Weight::Regular);
            assert_eq!(lines.join(" "), text);
            assert!(lines
                .iter()
                .all(|line| measure(line, SIZE, Weight::Regular) <= width));
        }
    }

    #[test]
    fn wrap_never_splits_a_long_word() {
        let lines = wrap_to_width("a Pneumoultramicroscopico b", 20.0, SIZE, Weight::Regular);
        assert_eq!(lines, vec!["a", "Pneumoultramicroscopico", "b"]);
        assert!(wrap_to_width("   ", 20.0, SIZE, Weight::Regular).is_empty());
    }
}
