//! Grounded answer generation: retrieved segments are rendered into a fixed
//! prompt and sent to the chat provider in a single call.

use std::sync::Arc;

use super::chunker::Segment;
use crate::core::errors::PipelineError;
use crate::llm::{ChatMessage, ChatProvider, ChatRequest};

pub const PROMPT_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end.\n\
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
Use three sentences maximum and keep the answer as concise as possible.\n\n\n\
{context}\n\
Question: {question}\n\
Helpful Answer:";

const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Clone)]
pub struct AnswerGenerator {
    provider: Arc<dyn ChatProvider>,
    temperature: Option<f64>,
}

impl AnswerGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>, temperature: Option<f64>) -> Self {
        Self {
            provider,
            temperature,
        }
    }

    /// Fills the template with the segment texts and the question.
    ///
    /// Placeholders are substituted in one pass, so braces inside the
    /// document or the question are left as they are.
    pub fn render_prompt(question: &str, segments: &[Segment]) -> String {
        let context = segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        let mut rendered =
            String::with_capacity(PROMPT_TEMPLATE.len() + context.len() + question.len());
        let mut rest = PROMPT_TEMPLATE;
        while let Some(start) = rest.find('{') {
            rendered.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(after) = tail.strip_prefix("{context}") {
                rendered.push_str(&context);
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{question}") {
                rendered.push_str(question);
                rest = after;
            } else {
                rendered.push('{');
                rest = &tail[1..];
            }
        }
        rendered.push_str(rest);
        rendered
    }

    /// Asks the provider once. The reply is returned exactly as received.
    pub async fn generate(
        &self,
        question: &str,
        segments: &[Segment],
    ) -> Result<String, PipelineError> {
        let prompt = Self::render_prompt(question, segments);
        tracing::debug!(
            provider = self.provider.name(),
            segments = segments.len(),
            prompt_chars = prompt.chars().count(),
            "generating answer"
        );

        let request =
            ChatRequest::new(vec![ChatMessage::user(prompt)]).with_temperature(self.temperature);
        self.provider.complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoProvider {
        reply: String,
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: ChatRequest) -> Result<String, PipelineError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }
    }

    fn segment(text: &str, position: usize) -> Segment {
        Segment {
            text: text.to_string(),
            document: "uploads/manual.pdf".to_string(),
            position,
            start_offset: 0,
            overlap: 0,
        }
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let segments = vec![
            segment("Warranty is two years.", 0),
            segment("Returns take 30 days.", 1),
        ];

        let prompt = AnswerGenerator::render_prompt("How long is the warranty?", &segments);

        assert_eq!(
            prompt,
            "Use the following pieces of context to answer the question at the end.\n\
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
Use three sentences maximum and keep the answer as concise as possible.\n\n\n\
Warranty is two years.\n\nReturns take 30 days.\n\
Question: How long is the warranty?\n\
Helpful Answer:"
        );
    }

    #[test]
    fn placeholders_inside_inputs_are_not_expanded() {
        let segments = vec![segment("literal {question} in the text", 0)];

        let prompt = AnswerGenerator::render_prompt("what about {context}?", &segments);

        assert!(prompt.contains("literal {question} in the text\nQuestion: what about {context}?"));
    }

    #[test]
    fn empty_context_still_renders() {
        let prompt = AnswerGenerator::render_prompt("anything?", &[]);
        assert!(prompt.contains("concise as possible.\n\n\n\nQuestion: anything?"));
    }

    #[tokio::test]
    async fn reply_is_returned_unmodified() {
        let provider = Arc::new(EchoProvider {
            reply: "  It is two years.\n".to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let generator = AnswerGenerator::new(provider.clone(), Some(0.2));

        let answer = generator
            .generate("warranty?", &[segment("Warranty is two years.", 0)])
            .await
            .unwrap();

        assert_eq!(answer, "  It is two years.\n");
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, Some(0.2));
        assert_eq!(requests[0].messages[0].role, "user");
    }

    #[tokio::test]
    async fn no_segments_still_calls_provider_once() {
        let provider = Arc::new(EchoProvider {
            reply: " I don't know. ".to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let generator = AnswerGenerator::new(provider.clone(), None);

        let answer = generator.generate("anything?", &[]).await.unwrap();

        assert_eq!(answer, " I don't know. ");
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].messages[0].content,
            AnswerGenerator::render_prompt("anything?", &[])
        );
    }
}
