use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::generation::Generator;
use crate::index::IndexStore;
use crate::models::SearchHit;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_FALLBACK_MIN_CHARS: usize = 3;
pub const NO_DOCUMENTS_MESSAGE: &str = "No documents found. Please upload and ingest files first.";

const PROMPT_TEMPLATE: &str = r#"
You are a helpful assistant. Use the following context to answer the question.
If the answer is not in the context, say "I don't know."

Context:
{context}

Question: {question}
Answer:
"#;

#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// Nothing has been ingested yet.
    NoDocuments,
    /// Model output grounded on retrieved segments.
    Generated { text: String, sources: Vec<SearchHit> },
    /// Model output for the bare question, without retrieval.
    Direct { text: String },
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Self::NoDocuments => NO_DOCUMENTS_MESSAGE,
            Self::Generated { text, .. } | Self::Direct { text } => text,
        }
    }

    pub fn sources(&self) -> &[SearchHit] {
        match self {
            Self::Generated { sources, .. } => sources,
            _ => &[],
        }
    }
}

/// Newline-joined segment texts in ranked order.
pub fn build_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replacen("{context}", context, 1)
        .replacen("{question}", question, 1)
}

pub struct AnswerEngine<E, G> {
    store: Arc<IndexStore<E>>,
    generator: G,
    top_k: usize,
}

impl<E, G> AnswerEngine<E, G>
where
    E: Embedder + Send + Sync + 'static,
    G: Generator + Send + Sync,
{
    pub fn new(store: IndexStore<E>, generator: G, top_k: usize) -> Self {
        Self {
            store: Arc::new(store),
            generator,
            top_k,
        }
    }

    pub fn store(&self) -> &IndexStore<E> {
        &self.store
    }

    /// Retrieves the closest segments and asks the generator to answer from them.
    pub async fn answer(&self, question: &str) -> Result<Answer, QueryError> {
        let Some(hits) = self.retrieve(question).await? else {
            info!(index = %self.store.name(), "no documents ingested yet");
            return Ok(Answer::NoDocuments);
        };

        let prompt = render_prompt(&build_context(&hits), question);
        info!(retrieved = hits.len(), "answering from retrieved context");

        let text = self.generator.generate(&prompt).await?;
        Ok(Answer::Generated { text, sources: hits })
    }

    /// Ranked hits for `question`, or `None` when the index is absent or empty.
    ///
    /// Loading waits on the index lock and reads the whole snapshot, so it runs
    /// on the blocking pool.
    pub async fn retrieve(&self, question: &str) -> Result<Option<Vec<SearchHit>>, QueryError> {
        let store = Arc::clone(&self.store);
        let question = question.to_string();
        let top_k = self.top_k;

        let hits = tokio::task::spawn_blocking(move || {
            let hits = match store.load()? {
                Some(index) if !index.is_empty() => Some(store.search(&index, &question, top_k)),
                _ => None,
            };
            Ok::<_, QueryError>(hits)
        })
        .await
        .map_err(|err| QueryError::Retrieval(err.to_string()))??;

        Ok(hits)
    }
}

/// Minimum answer length below which the retrieval answer is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityGate {
    pub min_chars: usize,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_chars: DEFAULT_FALLBACK_MIN_CHARS,
        }
    }
}

impl QualityGate {
    pub fn accepts(&self, answer: &Answer) -> bool {
        match answer {
            Answer::NoDocuments => true,
            Answer::Generated { text, .. } | Answer::Direct { text } => {
                text.trim().chars().count() >= self.min_chars
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStage {
    Retrieval,
    Direct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome {
    pub answer: Answer,
    pub stage: AnswerStage,
}

/// Retrieval answer first; a direct model call when it fails or the gate rejects it.
pub struct FallbackAnswerer<E, G, F> {
    primary: AnswerEngine<E, G>,
    fallback: F,
    gate: QualityGate,
}

impl<E, G, F> FallbackAnswerer<E, G, F>
where
    E: Embedder + Send + Sync + 'static,
    G: Generator + Send + Sync,
    F: Generator + Send + Sync,
{
    pub fn new(primary: AnswerEngine<E, G>, fallback: F, gate: QualityGate) -> Self {
        Self {
            primary,
            fallback,
            gate,
        }
    }

    pub fn primary(&self) -> &AnswerEngine<E, G> {
        &self.primary
    }

    pub async fn answer(&self, question: &str) -> Result<FallbackOutcome, QueryError> {
        match self.primary.answer(question).await {
            Ok(answer) if self.gate.accepts(&answer) => {
                return Ok(FallbackOutcome {
                    answer,
                    stage: AnswerStage::Retrieval,
                })
            }
            Ok(answer) => warn!(
                chars = answer.text().trim().chars().count(),
                min_chars = self.gate.min_chars,
                "retrieval answer too short, asking the model directly"
            ),
            Err(error) => warn!(%error, "retrieval answer failed, asking the model directly"),
        }

        let text = self.fallback.generate(question).await?;
        Ok(FallbackOutcome {
            answer: Answer::Direct { text },
            stage: AnswerStage::Direct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashedNgramEmbedder;
    use crate::error::GenerationError;
    use crate::models::Segment;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct FakeGenerator {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self::default()
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            self.reply
                .clone()
                .ok_or_else(|| GenerationError::Status {
                    status: 429,
                    body: "quota exceeded".to_string(),
                })
        }
    }

    fn store(dir: &TempDir) -> IndexStore<HashedNgramEmbedder> {
        IndexStore::new(dir.path(), "index", HashedNgramEmbedder::default())
    }

    fn seeded_store(dir: &TempDir) -> IndexStore<HashedNgramEmbedder> {
        let store = store(dir);
        let segments = [
            "The sun is the star at the center of the Solar System.",
            "Python is a versatile programming language.",
            "Water boils at 100 degrees Celsius.",
        ]
        .iter()
        .enumerate()
        .map(|(index, text)| Segment {
            text: text.to_string(),
            source: "manual_test.txt".to_string(),
            index,
            overlap: 0,
        })
        .collect::<Vec<_>>();
        store
            .add(&segments, "manual_test.txt")
            .expect("seeding the index should succeed");
        store
    }

    #[test]
    fn prompt_embeds_context_and_question() {
        let prompt = render_prompt("first\nsecond", "What is first?");
        assert!(prompt.contains("Context:\nfirst\nsecond\n\nQuestion: What is first?\nAnswer:"));
        assert!(prompt.contains("say \"I don't know.\""));
    }

    #[tokio::test]
    async fn absent_index_answers_with_sentinel_without_calling_model() {
        let dir = tempdir().unwrap();
        let engine = AnswerEngine::new(store(&dir), FakeGenerator::replying("unused"), DEFAULT_TOP_K);

        let answer = engine.answer("anything?").await.unwrap();
        assert_eq!(answer, Answer::NoDocuments);
        assert_eq!(answer.text(), NO_DOCUMENTS_MESSAGE);
        assert!(engine.generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn answer_uses_ranked_context_and_returns_model_text_verbatim() {
        let dir = tempdir().unwrap();
        let engine = AnswerEngine::new(
            seeded_store(&dir),
            FakeGenerator::replying("  100 degrees Celsius.\n"),
            2,
        );

        let answer = engine.answer("At what temperature does water boil?").await.unwrap();
        assert_eq!(answer.text(), "  100 degrees Celsius.\n");
        assert_eq!(answer.sources().len(), 2);
        assert_eq!(answer.sources()[0].text, "Water boils at 100 degrees Celsius.");

        let prompts = engine.generator.prompts();
        assert_eq!(prompts.len(), 1);
        let expected_context = build_context(answer.sources());
        assert!(prompts[0].contains(&format!("Context:\n{expected_context}\n")));
        assert!(prompts[0].contains("Question: At what temperature does water boil?"));
    }

    #[tokio::test]
    async fn generation_failures_surface_unmodified() {
        let dir = tempdir().unwrap();
        let engine = AnswerEngine::new(seeded_store(&dir), FakeGenerator::failing(), DEFAULT_TOP_K);

        let result = engine.answer("Where is the sun?").await;
        assert!(matches!(
            result,
            Err(QueryError::Generation(GenerationError::Status { status: 429, .. }))
        ));
        assert_eq!(engine.generator.prompts().len(), 1);
    }

    #[tokio::test]
    async fn waiting_on_a_locked_index_leaves_the_runtime_free() {
        use fs2::FileExt;
        use std::fs::OpenOptions;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempdir().unwrap();
        let engine = AnswerEngine::new(seeded_store(&dir), FakeGenerator::replying("100C"), 1);

        let lock_file = OpenOptions::new()
            .write(true)
            .open(engine.store().lock_path())
            .unwrap();
        FileExt::lock_exclusive(&lock_file).unwrap();

        let released_by_runtime = Arc::new(AtomicBool::new(false));
        let (release, released) = mpsc::channel::<()>();
        let writer = {
            let released_by_runtime = Arc::clone(&released_by_runtime);
            std::thread::spawn(move || {
                if released.recv_timeout(Duration::from_secs(5)).is_ok() {
                    released_by_runtime.store(true, Ordering::SeqCst);
                }
                FileExt::unlock(&lock_file).unwrap();
            })
        };

        let (answer, ()) = tokio::join!(engine.answer("water?"), async move {
            tokio::task::yield_now().await;
            release.send(()).unwrap();
        });

        writer.join().unwrap();
        assert!(released_by_runtime.load(Ordering::SeqCst));
        assert_eq!(answer.unwrap().text(), "100C");
    }

    #[tokio::test]
    async fn empty_index_retrieves_nothing() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        store.add(&[], "empty.txt").unwrap();
        let engine = AnswerEngine::new(store, FakeGenerator::replying("unused"), DEFAULT_TOP_K);

        assert_eq!(engine.retrieve("anything?").await.unwrap(), None);
        assert_eq!(engine.answer("anything?").await.unwrap(), Answer::NoDocuments);
    }

    #[test]
    fn gate_measures_trimmed_characters() {
        let gate = QualityGate { min_chars: 3 };
        assert!(!gate.accepts(&Answer::Direct { text: " ok \n".to_string() }));
        assert!(gate.accepts(&Answer::Direct { text: "yes".to_string() }));
        assert!(gate.accepts(&Answer::NoDocuments));
    }

    #[tokio::test]
    async fn good_retrieval_answer_skips_fallback() {
        let dir = tempdir().unwrap();
        let primary = AnswerEngine::new(seeded_store(&dir), FakeGenerator::replying("The sun."), 3);
        let answerer = FallbackAnswerer::new(primary, FakeGenerator::replying("direct"), QualityGate::default());

        let outcome = answerer.answer("What is the sun?").await.unwrap();
        assert_eq!(outcome.stage, AnswerStage::Retrieval);
        assert_eq!(outcome.answer.text(), "The sun.");
        assert!(answerer.fallback.prompts().is_empty());
    }

    #[tokio::test]
    async fn short_retrieval_answer_falls_back_to_direct_question() {
        let dir = tempdir().unwrap();
        let primary = AnswerEngine::new(seeded_store(&dir), FakeGenerator::replying(" . "), 3);
        let answerer = FallbackAnswerer::new(
            primary,
            FakeGenerator::replying("Python is a language."),
            QualityGate::default(),
        );

        let outcome = answerer.answer("What is Python?").await.unwrap();
        assert_eq!(outcome.stage, AnswerStage::Direct);
        assert_eq!(
            outcome.answer,
            Answer::Direct {
                text: "Python is a language.".to_string()
            }
        );
        assert_eq!(answerer.fallback.prompts(), vec!["What is Python?".to_string()]);
    }

    #[tokio::test]
    async fn failed_retrieval_answer_falls_back() {
        let dir = tempdir().unwrap();
        let primary = AnswerEngine::new(seeded_store(&dir), FakeGenerator::failing(), 3);
        let answerer = FallbackAnswerer::new(primary, FakeGenerator::replying("fallback"), QualityGate::default());

        let outcome = answerer.answer("What is Python?").await.unwrap();
        assert_eq!(outcome.stage, AnswerStage::Direct);
        assert_eq!(outcome.answer.text(), "fallback");
    }

    #[tokio::test]
    async fn sentinel_answer_does_not_trigger_fallback() {
        let dir = tempdir().unwrap();
        let primary = AnswerEngine::new(store(&dir), FakeGenerator::failing(), 3);
        let answerer = FallbackAnswerer::new(primary, FakeGenerator::failing(), QualityGate::default());

        let outcome = answerer.answer("Anything?").await.unwrap();
        assert_eq!(outcome.answer, Answer::NoDocuments);
        assert_eq!(outcome.stage, AnswerStage::Retrieval);
    }

    #[tokio::test]
    async fn fallback_errors_propagate() {
        let dir = tempdir().unwrap();
        let primary = AnswerEngine::new(seeded_store(&dir), FakeGenerator::failing(), 3);
        let answerer = FallbackAnswerer::new(primary, FakeGenerator::failing(), QualityGate::default());

        assert!(matches!(
            answerer.answer("What is Python?").await,
            Err(QueryError::Generation(_))
        ));
    }
}
