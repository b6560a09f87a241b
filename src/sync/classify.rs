use serde::{ Deserialize, Serialize };
use std::collections::{ HashMap, HashSet };
use std::fs;
use std::path::Path;
use tracing::{ info, warn };

/// The fixed label set. `Unclassified` is the fallback for an unready
/// classifier or a failed classification, never a trained category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Interested,
    MeetingBooked,
    NotInterested,
    Spam,
    OutOfOffice,
    Unclassified,
}

impl Label {
    /// Trained categories, in scoring order.
    pub const CATEGORIES: [Label; 5] = [
        Label::Interested,
        Label::MeetingBooked,
        Label::NotInterested,
        Label::Spam,
        Label::OutOfOffice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interested => "Interested",
            Self::MeetingBooked => "Meeting Booked",
            Self::NotInterested => "Not Interested",
            Self::Spam => "Spam",
            Self::OutOfOffice => "Out of Office",
            Self::Unclassified => "Unclassified",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "interested" => Self::Interested,
            "meeting booked" => Self::MeetingBooked,
            "not interested" => Self::NotInterested,
            "spam" => Self::Spam,
            "out of office" => Self::OutOfOffice,
            _ => Self::Unclassified,
        }
    }
}

/// Persisted term/label associations. Serialized as a single JSON
/// artifact; read-only at classification time.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BayesModel {
    /// label name -> term -> occurrence count
    term_counts: HashMap<String, HashMap<String, u64>>,
    /// label name -> number of training documents
    label_docs: HashMap<String, u64>,
    total_docs: u64,
}

/// Multinomial naive Bayes with Laplace smoothing over lowercase
/// alphanumeric tokens. Small enough to score a message in microseconds,
/// which is all the ingestion hot path needs.
#[derive(Debug, Default, Clone)]
pub struct BayesClassifier {
    model: BayesModel,
}

impl BayesClassifier {
    pub fn is_trained(&self) -> bool {
        self.model.total_docs > 0
    }

    pub fn train(&mut self, text: &str, label: Label) {
        let terms = self.model.term_counts.entry(label.as_str().to_string()).or_default();
        for token in tokenize(text) {
            *terms.entry(token).or_insert(0) += 1;
        }
        *self.model.label_docs.entry(label.as_str().to_string()).or_insert(0) += 1;
        self.model.total_docs += 1;
    }

    pub fn trained_from(examples: &[(&str, Label)]) -> Self {
        let mut classifier = Self::default();
        for (text, label) in examples {
            classifier.train(text, *label);
        }
        classifier
    }

    /// Returns the best-scoring trained category, or None when the model
    /// holds no training data. Empty input still scores (on priors
    /// alone), so this is total over ready models.
    pub fn classify(&self, text: &str) -> Option<Label> {
        if !self.is_trained() {
            return None;
        }

        let tokens = tokenize(text);

        let vocabulary: HashSet<&str> = self.model.term_counts
            .values()
            .flat_map(|terms| terms.keys())
            .map(String::as_str)
            .collect();
        let vocabulary_size = vocabulary.len().max(1) as f64;

        let mut best: Option<(Label, f64)> = None;
        for label in Label::CATEGORIES {
            let name = label.as_str();
            let docs = *self.model.label_docs.get(name).unwrap_or(&0);
            if docs == 0 {
                continue;
            }

            let terms = self.model.term_counts.get(name);
            let label_total = terms
                .map(|t| t.values().sum::<u64>())
                .unwrap_or(0) as f64;

            let mut score = ((docs as f64) / (self.model.total_docs as f64)).ln();
            for token in &tokens {
                let count = terms
                    .and_then(|t| t.get(token))
                    .copied()
                    .unwrap_or(0) as f64;
                score += ((count + 1.0) / (label_total + vocabulary_size)).ln();
            }

            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => {
                    best = Some((label, score));
                }
            }
        }

        best.map(|(label, _)| label)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let model: BayesModel = serde_json::from_str(&contents)?;
        Ok(Self { model })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(&self.model)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

/// Idempotent startup action: load the persisted model when it exists
/// and carries training data, otherwise train from the seed set and
/// persist the result for the next start. Never retrains implicitly.
pub fn load_or_train(path: &Path) -> anyhow::Result<BayesClassifier> {
    if path.exists() {
        match BayesClassifier::load(path) {
            Ok(classifier) if classifier.is_trained() => {
                info!("Loaded classifier model from {}", path.display());
                return Ok(classifier);
            }
            Ok(_) => warn!("Classifier model at {} has no training data, retraining from seed", path.display()),
            Err(e) => warn!("Failed to load classifier model from {}: {}", path.display(), e),
        }
    }

    let classifier = BayesClassifier::trained_from(SEED_TRAINING_SET);
    classifier.save(path)?;
    info!("Classifier trained from seed set and saved to {}", path.display());
    Ok(classifier)
}

fn tokenize(text: &str) -> Vec<String> {
    text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Seed examples used when no persisted model exists yet.
pub const SEED_TRAINING_SET: &[(&str, Label)] = &[
    ("I would like to receive more information about your services", Label::Interested),
    ("Could you provide details about pricing and features?", Label::Interested),
    ("I'm considering your offer, please send me the brochure", Label::Interested),
    ("Please let me know the next steps to get started", Label::Interested),
    ("I'm curious to learn how your product can help us", Label::Interested),

    ("I have scheduled a call for Thursday at 10 AM", Label::MeetingBooked),
    ("Looking forward to our meeting on Monday", Label::MeetingBooked),
    ("The meeting has been confirmed for 3 PM", Label::MeetingBooked),
    ("I accepted the calendar invite for our discussion", Label::MeetingBooked),
    ("See you tomorrow at the agreed time for our call", Label::MeetingBooked),

    ("Thank you, but I am not looking for this right now", Label::NotInterested),
    ("Please remove me from your contact list", Label::NotInterested),
    ("This is not relevant for my business", Label::NotInterested),
    ("I don't need this service, thank you", Label::NotInterested),
    ("Not interested in pursuing this opportunity", Label::NotInterested),

    ("You won a free iPhone, click here to claim", Label::Spam),
    ("Get rich quick with this simple trick", Label::Spam),
    ("Congratulations! You are selected for a prize", Label::Spam),
    ("Earn $1000 daily from home, limited offer", Label::Spam),
    ("Free lottery tickets, sign up now", Label::Spam),

    ("I am currently out of the office, will reply later", Label::OutOfOffice),
    ("I am on leave until next Monday", Label::OutOfOffice),
    ("Automatic reply: I am away from work this week", Label::OutOfOffice),
    ("Thank you for your email, I'm out of office", Label::OutOfOffice),
    ("I will be traveling and unable to respond until next week", Label::OutOfOffice),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_model_classifies_obvious_spam() {
        let classifier = BayesClassifier::trained_from(SEED_TRAINING_SET);
        assert_eq!(classifier.classify("You won free lottery tickets, claim your prize now"), Some(Label::Spam));
    }

    #[test]
    fn seed_model_classifies_out_of_office() {
        let classifier = BayesClassifier::trained_from(SEED_TRAINING_SET);
        assert_eq!(
            classifier.classify("Automatic reply: I am out of the office and will reply next week"),
            Some(Label::OutOfOffice)
        );
    }

    #[test]
    fn classify_is_total_over_a_ready_model() {
        let classifier = BayesClassifier::trained_from(SEED_TRAINING_SET);
        for input in ["", "   ", "zzzzz qqqqq", "!!!"] {
            let label = classifier.classify(input);
            assert!(label.is_some(), "no label for {:?}", input);
            assert_ne!(label, Some(Label::Unclassified));
        }
    }

    #[test]
    fn untrained_model_is_not_ready() {
        let classifier = BayesClassifier::default();
        assert!(!classifier.is_trained());
        assert_eq!(classifier.classify("anything"), None);
    }

    #[test]
    fn label_string_round_trip() {
        for label in Label::CATEGORIES {
            assert_eq!(Label::from_str(label.as_str()), label);
        }
        assert_eq!(Label::from_str("no such label"), Label::Unclassified);
    }

    #[test]
    fn load_or_train_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let first = load_or_train(&path).unwrap();
        assert!(first.is_trained());
        assert!(path.exists());

        // second call loads the persisted artifact instead of retraining
        let second = load_or_train(&path).unwrap();
        let probe = "free lottery prize";
        assert_eq!(first.classify(probe), second.classify(probe));
    }
}
