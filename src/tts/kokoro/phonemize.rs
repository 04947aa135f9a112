//! Grapheme-to-phoneme front end for Kokoro.
//!
//! English goes through `misaki-rs`. Every other supported language is
//! phonemized by the `espeak-ng` executable and then rewritten into the
//! symbol set Kokoro's vocabulary was trained on.

use crate::error::{Result, WorkerError};
use std::path::PathBuf;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Combining double inverted breve, used by `espeak-ng --ipa=1` to tie
/// multi-letter phonemes.
const TIE: char = '\u{0361}';

/// Kokoro pipeline language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageCode {
    /// `a` — American English.
    AmericanEnglish,
    /// `b` — British English.
    BritishEnglish,
    /// `e` — Spanish.
    Spanish,
    /// `f` — French.
    French,
    /// `h` — Hindi.
    Hindi,
    /// `i` — Italian.
    Italian,
    /// `j` — Japanese.
    Japanese,
    /// `p` — Brazilian Portuguese.
    BrazilianPortuguese,
    /// `z` — Mandarin Chinese.
    Mandarin,
}

impl LanguageCode {
    /// Parse a single-letter Kokoro code or one of its long aliases.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Config`] for anything else.
    pub fn parse(code: &str) -> Result<Self> {
        let lang = match code.trim().to_ascii_lowercase().as_str() {
            "a" | "en-us" => Self::AmericanEnglish,
            "b" | "en-gb" => Self::BritishEnglish,
            "e" | "es" => Self::Spanish,
            "f" | "fr-fr" => Self::French,
            "h" | "hi" => Self::Hindi,
            "i" | "it" => Self::Italian,
            "j" | "ja" => Self::Japanese,
            "p" | "pt-br" => Self::BrazilianPortuguese,
            "z" | "zh" => Self::Mandarin,
            other => {
                return Err(WorkerError::Config(format!(
                    "unknown language code '{other}'"
                )));
            }
        };
        Ok(lang)
    }

    /// The single-letter code.
    pub fn code(self) -> char {
        match self {
            Self::AmericanEnglish => 'a',
            Self::BritishEnglish => 'b',
            Self::Spanish => 'e',
            Self::French => 'f',
            Self::Hindi => 'h',
            Self::Italian => 'i',
            Self::Japanese => 'j',
            Self::BrazilianPortuguese => 'p',
            Self::Mandarin => 'z',
        }
    }

    fn espeak_voice(self) -> Option<&'static str> {
        match self {
            Self::Spanish => Some("es"),
            Self::French => Some("fr-fr"),
            Self::Hindi => Some("hi"),
            Self::Italian => Some("it"),
            Self::BrazilianPortuguese => Some("pt-br"),
            _ => None,
        }
    }
}

/// Converts text into a phoneme string for Kokoro's tokenizer.
pub enum Phonemizer {
    /// `misaki-rs` English G2P.
    Misaki(misaki_rs::G2P),
    /// `espeak-ng` subprocess.
    Espeak(EspeakG2p),
}

impl Phonemizer {
    /// Build the phonemizer for `lang`.
    ///
    /// # Errors
    ///
    /// Returns an error if the language has no supported G2P or the espeak
    /// executable cannot be found.
    pub fn for_language(lang: LanguageCode) -> Result<Self> {
        match lang {
            LanguageCode::AmericanEnglish => {
                Ok(Self::Misaki(misaki_rs::G2P::new(misaki_rs::Language::EnglishUS)))
            }
            LanguageCode::BritishEnglish => {
                Ok(Self::Misaki(misaki_rs::G2P::new(misaki_rs::Language::EnglishGB)))
            }
            other => match other.espeak_voice() {
                Some(voice) => Ok(Self::Espeak(EspeakG2p::locate(voice)?)),
                None => Err(WorkerError::Config(format!(
                    "language '{}' needs a dedicated G2P and is not supported",
                    other.code()
                ))),
            },
        }
    }

    /// Phonemize one segment. Returns an empty string when nothing
    /// pronounceable is left after normalization.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying G2P fails.
    pub fn phonemize(&self, text: &str) -> Result<String> {
        let normalized = normalize_text(text);
        if normalized.trim().is_empty() {
            return Ok(String::new());
        }
        match self {
            Self::Misaki(g2p) => {
                let (phonemes, _tokens) = g2p
                    .g2p(&expand_english(&normalized))
                    .map_err(|e| WorkerError::Phonemize(format!("misaki failed: {e}")))?;
                Ok(phonemes.trim().to_owned())
            }
            Self::Espeak(espeak) => espeak.phonemize(&normalized),
        }
    }
}

/// `espeak-ng` invoked once per segment.
pub struct EspeakG2p {
    program: PathBuf,
    voice: &'static str,
}

impl EspeakG2p {
    /// Find `espeak-ng` (or legacy `espeak`) on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Phonemize`] if neither is installed.
    pub fn locate(voice: &'static str) -> Result<Self> {
        let program = which::which("espeak-ng")
            .or_else(|_| which::which("espeak"))
            .map_err(|_| {
                WorkerError::Phonemize("no espeak phonemizer found on PATH (tried: espeak-ng, espeak)".into())
            })?;
        info!("using {} for voice '{voice}'", program.display());
        Ok(Self { program, voice })
    }

    /// Phonemize `text` clause by clause, putting the punctuation between
    /// clauses back so Kokoro still sees the pauses.
    fn phonemize(&self, text: &str) -> Result<String> {
        let mut out = String::new();
        for (clause, punct) in split_clauses(text) {
            let phonemes = if clause.is_empty() {
                String::new()
            } else {
                self.run(clause)?
            };
            if !phonemes.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&phonemes);
            }
            if let Some(p) = punct
                && !out.is_empty()
            {
                out.push(p);
            }
        }
        Ok(out)
    }

    /// One espeak call. The text goes through stdin so that nothing in it
    /// can be read as a command-line option.
    fn run(&self, text: &str) -> Result<String> {
        let spawn_err = |e: std::io::Error| {
            WorkerError::Phonemize(format!("failed to run {}: {e}", self.program.display()))
        };
        let mut child = Command::new(&self.program)
            .args(["-q", "-b", "1", "--ipa=1", "-v", self.voice, "--stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Phonemize("espeak stdin unavailable".into()))?;
        // Written from a second thread so a long clause cannot deadlock
        // against a full stdout pipe.
        let (output, written) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || {
                stdin.write_all(text.as_bytes())?;
                stdin.write_all(b"\n")
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            (output, written)
        });
        let output = output.map_err(spawn_err)?;

        if !output.status.success() {
            return Err(WorkerError::Phonemize(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        written.map_err(spawn_err)?;

        let raw = String::from_utf8_lossy(&output.stdout);
        debug!("espeak raw output: {raw:?}");
        Ok(espeak_to_kokoro(&raw))
    }
}

/// Punctuation Kokoro's vocabulary knows and espeak drops.
const CLAUSE_MARKS: &[char] = &[',', ';', ':', '.', '!', '?', '\u{2026}'];

/// Split `text` after every clause mark that ends a word, so `3,5` stays
/// whole while `Olá, mundo.` becomes `("Olá", ','), ("mundo", '.')`.
/// Runs of marks such as `?!` or `...` keep only the first one.
fn split_clauses(text: &str) -> Vec<(&str, Option<char>)> {
    let mut clauses = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !CLAUSE_MARKS.contains(&c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !CLAUSE_MARKS.contains(&next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if at_boundary {
            clauses.push((text[start..i].trim(), Some(c)));
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        clauses.push((rest, None));
    }
    clauses
}

/// Rewrite espeak IPA into Kokoro's phoneme inventory.
///
/// Clause lines are joined with single spaces, tied pairs collapse to the
/// single symbols Kokoro uses, and a few symbols missing from its vocabulary
/// are substituted.
pub fn espeak_to_kokoro(raw: &str) -> String {
    const TIED: &[(&str, &str)] = &[
        ("a\u{0361}ɪ", "I"),
        ("a\u{0361}ʊ", "W"),
        ("d\u{0361}z", "ʣ"),
        ("d\u{0361}ʒ", "ʤ"),
        ("e\u{0361}ɪ", "A"),
        ("o\u{0361}ʊ", "O"),
        ("ə\u{0361}ʊ", "Q"),
        ("s\u{0361}s", "S"),
        ("t\u{0361}s", "ʦ"),
        ("t\u{0361}ʃ", "ʧ"),
        ("ɔ\u{0361}ɪ", "Y"),
    ];

    let mut ps = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for (from, to) in TIED {
        ps = ps.replace(from, to);
    }
    ps.chars()
        .filter(|&c| c != TIE)
        .map(|c| match c {
            'ʲ' => 'j',
            'r' => 'ɹ',
            'x' => 'k',
            'ɬ' => 'l',
            other => other,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Text normalization
// ---------------------------------------------------------------------------

/// Language-neutral cleanup applied before any G2P.
///
/// Curly quotes become ASCII, em/en dashes become a spaced hyphen, and
/// markdown emphasis and heading markers are dropped.
pub fn normalize_text(text: &str) -> String {
    let text = text
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2014}', '\u{2013}'], " - ");

    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let body = if trimmed.starts_with('#') {
                trimmed.trim_start_matches('#').trim_start()
            } else {
                line
            };
            body.replace('*', "")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// English-only expansions misaki does not handle itself.
fn expand_english(text: &str) -> String {
    const ABBREVS: &[(&str, &str)] = &[
        ("Mrs.", "Missus"),
        ("Mr.", "Mister"),
        ("Ms.", "Miz"),
        ("Dr.", "Doctor"),
        ("St.", "Saint"),
        ("vs.", "versus"),
        ("etc.", "etcetera"),
        ("e.g.", "for example"),
        ("i.e.", "that is"),
    ];

    text.split(' ')
        .map(|word| {
            if let Some(&(_, spoken)) = ABBREVS.iter().find(|(abbrev, _)| *abbrev == word) {
                return spoken.to_owned();
            }
            expand_currency_word(word).unwrap_or_else(|| word.to_owned())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `$5` → `5 dollars`, keeping any trailing punctuation.
fn expand_currency_word(word: &str) -> Option<String> {
    let mut chars = word.chars();
    let unit = match chars.next()? {
        '$' => "dollars",
        '£' => "pounds",
        '€' => "euros",
        _ => return None,
    };
    let rest = chars.as_str();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let (digits, tail) = rest.split_at(digits_end);
    Some(format!("{digits} {unit}{tail}"))
}
