//! Keyword and sentiment features from chunk transcripts.

use clipwatch_models::SemanticFeatures;

/// Excitement phrases and their weights.
const HYPE_PHRASES: &[(&str, f64)] = &[
    ("omg", 3.0),
    ("insane", 2.8),
    ("incredible", 2.5),
    ("amazing", 2.3),
    ("unbelievable", 2.5),
    ("clutch", 2.8),
    ("sick", 2.0),
    ("nasty", 2.0),
    ("holy", 2.2),
    ("damn", 1.8),
    ("wow", 2.0),
    ("what", 1.5),
    ("nice", 1.5),
    ("good", 1.2),
    ("great", 1.8),
    ("awesome", 2.0),
    ("crazy", 2.3),
    ("wild", 2.0),
    ("mental", 2.2),
    ("nuts", 2.0),
    ("gg", 1.5),
    ("ez", 1.3),
    ("rekt", 1.8),
    ("owned", 1.8),
    ("destroyed", 2.0),
    ("demolished", 2.0),
    ("wrecked", 1.8),
    ("no way", 2.5),
    ("are you kidding", 2.3),
    ("you gotta be", 2.0),
    ("thats actually", 1.8),
    ("im done", 1.5),
    ("im dead", 1.7),
];

/// Word valences on a -4..4 scale.
const VALENCE: &[(&str, f64)] = &[
    ("amazing", 2.8),
    ("awesome", 3.1),
    ("beautiful", 2.9),
    ("best", 3.2),
    ("cool", 1.3),
    ("excellent", 2.7),
    ("fun", 2.3),
    ("good", 1.9),
    ("great", 3.1),
    ("happy", 2.7),
    ("incredible", 2.5),
    ("insane", 1.2),
    ("love", 3.2),
    ("nice", 1.8),
    ("perfect", 2.7),
    ("win", 2.8),
    ("wow", 2.8),
    ("yes", 1.7),
    ("awful", -2.0),
    ("bad", -2.5),
    ("boring", -1.3),
    ("damn", -1.7),
    ("dead", -3.3),
    ("hate", -2.7),
    ("lose", -1.3),
    ("lost", -1.3),
    ("sad", -2.1),
    ("terrible", -2.1),
    ("trash", -1.8),
    ("ugly", -2.3),
    ("worst", -3.1),
    ("wrong", -2.1),
];

const NEGATIONS: &[&str] = &["not", "never", "no", "dont", "isnt", "wasnt", "aint", "cant"];

const NEGATION_SCALAR: f64 = -0.74;

/// Normalization constant for the compound score.
const COMPOUND_ALPHA: f64 = 15.0;

/// Lowercase word tokens with apostrophes folded away ("that's" -> "thats").
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace(['\'', '\u{2019}'], "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.is_empty() || words.len() > tokens.len() {
        return false;
    }
    tokens
        .windows(words.len())
        .any(|window| window.iter().zip(&words).all(|(t, w)| t == w))
}

/// Mean weight of distinct hype phrases present, or 0.
pub fn hype_score(tokens: &[String]) -> f64 {
    let (sum, count) = HYPE_PHRASES
        .iter()
        .filter(|(phrase, _)| contains_phrase(tokens, phrase))
        .fold((0.0, 0u32), |(sum, count), (_, weight)| (sum + weight, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Lexicon sentiment compound score in `[-1, 1]`.
pub fn sentiment(tokens: &[String]) -> f64 {
    let mut total = 0.0;
    for (i, token) in tokens.iter().enumerate() {
        let Some((_, valence)) = VALENCE.iter().find(|(word, _)| word == token) else {
            continue;
        };
        let negated = i > 0 && NEGATIONS.contains(&tokens[i - 1].as_str());
        total += if negated {
            valence * NEGATION_SCALAR
        } else {
            *valence
        };
    }

    if total == 0.0 {
        return 0.0;
    }
    (total / (total * total + COMPOUND_ALPHA).sqrt()).clamp(-1.0, 1.0)
}

/// Combine sentiment and hype into one excitement estimate, capped at 1.
pub fn excitement(sentiment: f64, hype: f64) -> f64 {
    (((sentiment + 1.0) / 2.0) * 0.7 + (hype / 3.0) * 0.3).min(1.0)
}

/// Derive semantic features from an optional transcript.
pub fn analyze_text(text: Option<&str>) -> SemanticFeatures {
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        return SemanticFeatures::default();
    };

    let tokens = tokenize(text);
    let sentiment = sentiment(&tokens);
    let hype = hype_score(&tokens);

    SemanticFeatures {
        sentiment,
        excitement: excitement(sentiment, hype),
        hype_score: hype,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_has_no_features() {
        assert_eq!(analyze_text(None), SemanticFeatures::default());
        assert_eq!(analyze_text(Some("  ")), SemanticFeatures::default());
    }

    #[test]
    fn test_hype_is_mean_of_matched_weights() {
        let tokens = tokenize("OMG that was INSANE");
        assert!((hype_score(&tokens) - 2.9).abs() < 1e-9);
    }

    #[test]
    fn test_phrases_match_whole_words() {
        assert_eq!(hype_score(&tokenize("whatever, nothing here")), 0.0);
        assert!((hype_score(&tokenize("no way!")) - 2.5).abs() < 1e-9);
        assert!((hype_score(&tokenize("that's actually nuts")) - 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_sentiment_sign_and_negation() {
        assert!(sentiment(&tokenize("this is great")) > 0.5);
        assert!(sentiment(&tokenize("this is not great")) < 0.0);
        assert_eq!(sentiment(&tokenize("the quick fox")), 0.0);
    }

    #[test]
    fn test_excitement_formula() {
        assert!((excitement(0.0, 0.0) - 0.35).abs() < 1e-9);
        assert!((excitement(1.0, 3.0) - 1.0).abs() < 1e-9);
        assert_eq!(excitement(1.0, 30.0), 1.0);
    }
}
