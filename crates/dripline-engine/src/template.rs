// SPDX-FileCopyrightText: 2026 Dripline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message content templating.
//!
//! [`render_content`] runs two passes over the stored template:
//! 1. Spintax groups such as `{Hi|Hello|Hey}` are replaced by one variant
//!    chosen at random. Groups are resolved innermost first, so
//!    `{Good {morning|day}|Hi}` works.
//! 2. `{name}` and `{phone}` are substituted for the recipient.
//!
//! Spintax runs first so recipient data never takes part in variant
//! selection. Braces that contain no `|` and are not a known placeholder
//! are left as written.
//!
//! [`Renderer`] always normalizes line breaks first. The greeting line and
//! text variation stages run only when enabled under `[template]`.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use dripline_config::model::TemplateConfig;
use rand::Rng;
use rand::seq::SliceRandom;
use regex::{Captures, Regex};

/// Innermost brace group containing at least one `|`.
static SPINTAX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]*\|[^{}]*)\}").expect("spintax pattern is valid"));

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(name|phone)\}").expect("placeholder pattern is valid"));

/// Spellings of a line break that arrive from web forms and spreadsheets.
/// `\r\n` comes before `\n` so it collapses to one break.
const LINE_BREAKS: &[&str] = &[
    "\\r\\n", "\\n", "%0A", "%0a", "<br />", "<br/>", "<br>", "[br]", "{br}",
];

const MORNING: &[&str] = &["Selamat pagi", "Pagi", "Assalamualaikum"];
const AFTERNOON: &[&str] = &["Selamat tengahari", "Salam", "Hi"];
const EVENING: &[&str] = &["Selamat petang", "Petang", "Salam"];
const NIGHT: &[&str] = &["Selamat malam", "Malam", "Maaf ganggu", "Pinjam masa"];

const ZERO_WIDTH: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// Look-alike letters from the Cyrillic, Greek and Latin Extended blocks.
const HOMOGLYPHS: &[(char, &[char])] = &[
    ('a', &['а', 'ɑ', 'α']),
    ('b', &['Ь', 'ƅ', 'ḃ']),
    ('c', &['с', 'ϲ', 'ć']),
    ('d', &['ԁ', 'ɗ', 'ḍ']),
    ('e', &['е', 'ė', 'ẹ']),
    ('f', &['ƒ', 'ḟ']),
    ('g', &['ɡ', 'ġ', 'ǵ']),
    ('h', &['һ', 'ḣ', 'ḥ']),
    ('i', &['і', 'ı', 'ḭ']),
    ('j', &['ј', 'ĵ', 'ǰ']),
    ('k', &['κ', 'ḳ', 'ķ']),
    ('l', &['ⅼ', 'ḷ', 'ļ']),
    ('m', &['м', 'ṁ', 'ḿ']),
    ('n', &['ո', 'ṅ', 'ń']),
    ('o', &['о', 'ο', 'ȯ']),
    ('p', &['р', 'ρ', 'ṗ']),
    ('q', &['ԛ', 'ɋ']),
    ('r', &['г', 'ṙ', 'ŕ']),
    ('s', &['ѕ', 'ṡ', 'ś']),
    ('t', &['τ', 'ṫ', 'ť']),
    ('u', &['υ', 'ս', 'ů']),
    ('v', &['ν', 'ѵ', 'ṿ']),
    ('w', &['ԝ', 'ẇ', 'ẃ']),
    ('x', &['х', 'ẋ', 'ẍ']),
    ('y', &['у', 'ү', 'ẏ']),
    ('z', &['ᴢ', 'ż', 'ź']),
];

/// Share of letters swapped for a homoglyph. At least one is always swapped.
const HOMOGLYPH_RATIO: f64 = 0.05;
const ZERO_WIDTH_INSERTS: usize = 2;

/// The person a message is rendered for.
#[derive(Debug, Clone, Copy)]
pub struct Recipient<'a> {
    pub name: &'a str,
    pub phone: &'a str,
}

/// Render `template` for `recipient`.
pub fn render_content<R: Rng>(
    template: &str,
    recipient: &Recipient<'_>,
    fallback_name: &str,
    rng: &mut R,
) -> String {
    let mut out = template.to_string();
    while SPINTAX.is_match(&out) {
        out = SPINTAX
            .replace_all(&out, |caps: &Captures<'_>| {
                let variants: Vec<&str> = caps[1].split('|').collect();
                variants[rng.gen_range(0..variants.len())].to_string()
            })
            .into_owned();
    }

    let name = display_name(recipient, fallback_name);
    PLACEHOLDER
        .replace_all(&out, |caps: &Captures<'_>| match &caps[1] {
            "name" => name.to_string(),
            _ => recipient.phone.to_string(),
        })
        .into_owned()
}

/// The name to greet a recipient with.
///
/// Imported contact lists often carry the phone number in the name column;
/// those get the fallback.
pub fn display_name<'a>(recipient: &Recipient<'a>, fallback_name: &'a str) -> &'a str {
    let name = recipient.name.trim();
    if name.is_empty() || name == recipient.phone.trim() || looks_like_phone(name) {
        fallback_name
    } else {
        name
    }
}

/// At least 80% of the non-whitespace characters are digits.
fn looks_like_phone(value: &str) -> bool {
    let mut total = 0usize;
    let mut digits = 0usize;
    for c in value.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if c.is_ascii_digit() {
            digits += 1;
        }
    }
    total > 0 && digits * 5 >= total * 4
}

/// Full rendering pipeline for one message, configured from `[template]`.
#[derive(Debug, Clone)]
pub struct Renderer {
    fallback_name: String,
    greeting: bool,
    randomize: bool,
    offset: FixedOffset,
}

impl Renderer {
    pub fn new(config: &TemplateConfig) -> Self {
        Self {
            fallback_name: config.fallback_name.clone(),
            greeting: config.greeting,
            randomize: config.randomize,
            offset: FixedOffset::east_opt(config.greeting_utc_offset_minutes * 60)
                .unwrap_or_else(|| Utc.fix()),
        }
    }

    /// Render `template` for a message that goes out at `send_at`.
    ///
    /// The greeting is picked from the local hour of `send_at`, not of the
    /// moment the row is created.
    pub fn render<R: Rng>(
        &self,
        template: &str,
        recipient: &Recipient<'_>,
        send_at: DateTime<Utc>,
        rng: &mut R,
    ) -> String {
        let body = render_content(&normalize_line_breaks(template), recipient, &self.fallback_name, rng);
        let text = if self.greeting {
            let hour = send_at.with_timezone(&self.offset).hour();
            let name = greeting_name(recipient, &self.fallback_name);
            format!("{}\n\n{body}", greeting_line(&name, hour, rng))
        } else {
            body
        };
        if self.randomize {
            vary_text(&text, rng)
        } else {
            text
        }
    }
}

/// Turn every escaped or markup line break into `\n`.
pub fn normalize_line_breaks(text: &str) -> String {
    LINE_BREAKS
        .iter()
        .fold(text.to_string(), |acc, form| acc.replace(form, "\n"))
}

/// Letters and spaces of the display name; digits and symbols are dropped.
fn greeting_name(recipient: &Recipient<'_>, fallback_name: &str) -> String {
    let cleaned: String = display_name(recipient, fallback_name)
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        fallback_name.to_string()
    } else {
        cleaned
    }
}

/// `"<salutation> <name>,"` for a local `hour` in `0..24`.
pub fn greeting_line<R: Rng>(name: &str, hour: u32, rng: &mut R) -> String {
    let choices = match hour {
        5..=11 => MORNING,
        12..=14 => AFTERNOON,
        15..=18 => EVENING,
        _ => NIGHT,
    };
    let salutation = choices.choose(rng).copied().unwrap_or("Hi");
    format!("{salutation} {name},")
}

/// Make each rendered copy differ slightly from the next using homoglyphs,
/// zero-width characters and punctuation spacing.
///
/// Words that look like links or e-mail addresses are never touched, and
/// line structure is kept.
pub fn vary_text<R: Rng>(text: &str, rng: &mut R) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }
    let mut chars: Vec<char> = text.chars().collect();
    let protected = protected_mask(&chars);

    swap_homoglyphs(&mut chars, &protected, rng);
    let spaced = space_punctuation(&chars, &protected, rng);
    insert_zero_width(&spaced, rng)
}

/// Marks every char that belongs to a URL- or address-like word.
fn protected_mask(chars: &[char]) -> Vec<bool> {
    let mut mask = vec![false; chars.len()];
    let mut start = 0;
    while start < chars.len() {
        if chars[start].is_whitespace() {
            start += 1;
            continue;
        }
        let end = chars[start..]
            .iter()
            .position(|c| c.is_whitespace())
            .map_or(chars.len(), |len| start + len);
        let word: String = chars[start..end].iter().collect();
        if word.contains("://") || word.contains("www.") || word.contains('@') {
            mask[start..end].fill(true);
        }
        start = end;
    }
    mask
}

fn swap_homoglyphs<R: Rng>(chars: &mut [char], protected: &[bool], rng: &mut R) {
    let mut candidates: Vec<usize> = (0..chars.len())
        .filter(|&i| !protected[i] && homoglyphs_for(chars[i]).is_some())
        .collect();
    if candidates.is_empty() {
        return;
    }
    let letters = chars.iter().filter(|c| c.is_alphabetic()).count();
    let wanted = ((letters as f64 * HOMOGLYPH_RATIO) as usize).max(1);
    candidates.shuffle(rng);
    for &i in candidates.iter().take(wanted) {
        let original = chars[i];
        if let Some(&swap) = homoglyphs_for(original).and_then(|options| options.choose(rng)) {
            chars[i] = if original.is_uppercase() {
                swap.to_uppercase().next().filter(|up| *up != original).unwrap_or(swap)
            } else {
                swap
            };
        }
    }
}

fn homoglyphs_for(c: char) -> Option<&'static [char]> {
    let lower = c.to_ascii_lowercase();
    HOMOGLYPHS
        .iter()
        .find(|(letter, _)| *letter == lower)
        .map(|(_, options)| *options)
}

/// Per mark, the chance that a space is added where it runs straight into
/// the next word (`"Hi!Ali"` -> `"Hi! Ali"`). A `.` only counts before an
/// uppercase letter so decimals and domains stay whole.
fn space_punctuation<R: Rng>(chars: &[char], protected: &[bool], rng: &mut R) -> Vec<char> {
    let enabled: Vec<char> = [('!', 0.1), ('?', 0.1), ('.', 0.1), (',', 0.05)]
        .into_iter()
        .filter_map(|(mark, chance)| rng.gen_bool(chance).then_some(mark))
        .collect();

    let mut out = Vec::with_capacity(chars.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        let Some(&next) = chars.get(i + 1) else {
            continue;
        };
        if protected[i] || !enabled.contains(&c) || !next.is_alphabetic() {
            continue;
        }
        if c == '.' && !next.is_uppercase() {
            continue;
        }
        out.push(' ');
    }
    out
}

/// Put a zero-width character in front of up to two randomly chosen words
/// that follow a space. The first word of each line is never touched.
fn insert_zero_width<R: Rng>(chars: &[char], rng: &mut R) -> String {
    let protected = protected_mask(chars);
    let starts: Vec<usize> = (1..chars.len())
        .filter(|&i| chars[i - 1] == ' ' && !chars[i].is_whitespace() && !protected[i])
        .collect();
    let chosen: Vec<usize> = starts
        .choose_multiple(rng, ZERO_WIDTH_INSERTS)
        .copied()
        .collect();

    let mut out = String::with_capacity(chars.len() * 2);
    for (i, &c) in chars.iter().enumerate() {
        if chosen.contains(&i) {
            if let Some(&zw) = ZERO_WIDTH.choose(rng) {
                out.push(zw);
            }
        }
        out.push(c);
    }
    out
}
