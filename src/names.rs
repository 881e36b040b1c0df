//! Candidate names for temporary environments.
//!
//! Yields progressively less friendly but more available candidates: cached
//! EFF short wordlist draws, system dictionary draws, then random letters.
//! The final 32-letter draw makes exhaustion effectively unreachable.

use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::Path;

const EFF_WORDLIST_URL: &str = "https://www.eff.org/files/2016/09/08/eff_short_wordlist_1.txt";
const EFF_WORDLIST_FILE: &str = "eff_short_wordlist_1.txt";

const EFF_DRAWS: u32 = 200;
const DICT_DRAWS: u32 = 200;
const SHORT_DRAWS: u32 = 20;

#[derive(Clone, Copy)]
enum Stage {
    Eff { remaining: u32 },
    Dict { remaining: u32 },
    Short { remaining: u32 },
    Long,
    Done,
}

/// Finite iterator over candidate environment names.
///
/// Each draw from a word source is an attempt, not a guarantee: draws that
/// fail the length/charset filter consume the attempt without yielding.
pub struct NameCandidates<R: Rng> {
    rng: R,
    eff_words: Vec<String>,
    dict_words: Vec<String>,
    stage: Stage,
}

/// Candidates backed by the real word sources.
pub fn candidates<R: Rng>(cache_dir: &Path, rng: R) -> NameCandidates<R> {
    let eff_words = eff_words(cache_dir);
    let dict_words = dict_words(Path::new("/usr/share/dict/words"));
    NameCandidates::with_sources(eff_words, dict_words, rng)
}

impl<R: Rng> NameCandidates<R> {
    pub fn with_sources(eff_words: Vec<String>, dict_words: Vec<String>, rng: R) -> Self {
        Self {
            rng,
            eff_words,
            dict_words,
            stage: Stage::Eff {
                remaining: EFF_DRAWS,
            },
        }
    }

    fn random_letters(&mut self, count: usize) -> String {
        (0..count)
            .map(|_| char::from(b'a' + self.rng.gen_range(0..26)))
            .collect()
    }
}

impl<R: Rng> Iterator for NameCandidates<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match self.stage {
                Stage::Eff { remaining } => {
                    if remaining == 0 || self.eff_words.is_empty() {
                        self.stage = Stage::Dict {
                            remaining: DICT_DRAWS,
                        };
                        continue;
                    }
                    self.stage = Stage::Eff {
                        remaining: remaining - 1,
                    };
                    if let Some(word) = self.eff_words.choose(&mut self.rng) {
                        if usable_word(word, 10) {
                            return Some(word.clone());
                        }
                    }
                }
                Stage::Dict { remaining } => {
                    if remaining == 0 || self.dict_words.is_empty() {
                        self.stage = Stage::Short {
                            remaining: SHORT_DRAWS,
                        };
                        continue;
                    }
                    self.stage = Stage::Dict {
                        remaining: remaining - 1,
                    };
                    if let Some(word) = self.dict_words.choose(&mut self.rng) {
                        if usable_word(word, 6) {
                            return Some(word.clone());
                        }
                    }
                }
                Stage::Short { remaining } => {
                    if remaining == 0 {
                        self.stage = Stage::Long;
                        continue;
                    }
                    self.stage = Stage::Short {
                        remaining: remaining - 1,
                    };
                    return Some(self.random_letters(6));
                }
                Stage::Long => {
                    self.stage = Stage::Done;
                    return Some(self.random_letters(32));
                }
                Stage::Done => return None,
            }
        }
    }
}

fn usable_word(word: &str, max_len: usize) -> bool {
    !word.is_empty() && word.len() <= max_len && word.bytes().all(|b| b.is_ascii_lowercase())
}

/// The EFF short wordlist, cached on disk after the first fetch. Lines are
/// `<dice roll>\t<word>`; only the word column is kept. A failed fetch skips
/// the source for this session.
fn eff_words(cache_dir: &Path) -> Vec<String> {
    let cache_file = cache_dir.join(EFF_WORDLIST_FILE);
    let body = match fs::read_to_string(&cache_file) {
        Ok(body) => body,
        Err(_) => match fetch_wordlist() {
            Some(body) => {
                if let Err(err) = fs::create_dir_all(cache_dir)
                    .and_then(|()| fs::write(&cache_file, &body))
                {
                    tracing::warn!("failed to cache wordlist at {}: {err}", cache_file.display());
                }
                body
            }
            None => return Vec::new(),
        },
    };
    parse_wordlist(&body)
}

fn fetch_wordlist() -> Option<String> {
    match ureq::get(EFF_WORDLIST_URL).call() {
        Ok(mut response) => match response.body_mut().read_to_string() {
            Ok(body) => Some(body),
            Err(err) => {
                tracing::warn!("failed to read EFF short wordlist from {EFF_WORDLIST_URL}: {err}");
                None
            }
        },
        Err(err) => {
            tracing::warn!("failed to download EFF short wordlist from {EFF_WORDLIST_URL}: {err}");
            None
        }
    }
}

fn parse_wordlist(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

fn dict_words(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(body) => body.lines().map(|line| line.trim().to_string()).collect(),
        Err(_) => Vec::new(),
    }
}
