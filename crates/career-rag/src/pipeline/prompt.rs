//! Prompt templates for answering, routing and grading

use regex::Regex;

use crate::error::{Error, Result};
use crate::types::{EvidenceChunk, MetadataValue};

/// Closing line of the routing prompt
pub const ROUTE_MARKER: &str = "Route to: vectorstore or web_search";
/// Closing line of the relevance grading prompt
pub const RELEVANCE_MARKER: &str = "Relevant (yes/no):";
/// Closing line of the groundedness prompt
pub const GROUNDED_MARKER: &str = "Grounded (yes/no):";

/// Which answer template was used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptShape {
    /// Numbered context blocks, answer only from context
    Grounded,
    /// No evidence, answer from general knowledge
    GeneralKnowledge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Vietnamese,
}

/// A rendered answer prompt
#[derive(Debug, Clone)]
pub struct AnswerPrompt {
    pub text: String,
    pub shape: PromptShape,
    pub language: Language,
}

/// Parsed yes/no reply from a grader call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    Unclear,
}

impl Verdict {
    /// First yes/no word in the reply wins; anything else is unclear
    pub fn parse(reply: &str) -> Self {
        let lowered = reply.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()) {
            match word {
                "yes" | "có" => return Verdict::Yes,
                "no" | "không" => return Verdict::No,
                _ => {}
            }
        }
        Verdict::Unclear
    }
}

/// Prompt builder for the chat pipeline
pub struct PromptBuilder {
    vietnamese: Regex,
}

impl PromptBuilder {
    pub fn new() -> Result<Self> {
        let vietnamese = Regex::new(
            r"(?i)[àáạảãâầấậẩẫăằắặẳẵèéẹẻẽêềếệểễìíịỉĩòóọỏõôồốộổỗơờớợởỡùúụủũưừứựửữỳýỵỷỹđ]",
        )
        .map_err(|e| Error::internal(format!("Invalid language pattern: {}", e)))?;
        Ok(Self { vietnamese })
    }

    /// Whether text contains Vietnamese diacritics
    pub fn is_vietnamese(&self, text: &str) -> bool {
        self.vietnamese.is_match(text)
    }

    pub fn language(&self, text: &str) -> Language {
        if self.is_vietnamese(text) {
            Language::Vietnamese
        } else {
            Language::English
        }
    }

    /// Build the answer prompt. The shape follows from whether any evidence is present.
    pub fn answer_prompt(
        &self,
        question: &str,
        chunks: &[EvidenceChunk],
        user_context: Option<&str>,
    ) -> AnswerPrompt {
        let language = self.language(question);
        let shape = if chunks.is_empty() {
            PromptShape::GeneralKnowledge
        } else {
            PromptShape::Grounded
        };

        let text = match (language, shape) {
            (Language::English, PromptShape::Grounded) => format!(
                r#"You are an AI assistant helping with career guidance and educational content.
Use ONLY the following retrieved context to answer the question accurately and helpfully.
If the context doesn't contain enough information, say so clearly.
Keep your answer concise but comprehensive.
{profile}
Context from retrieved sources:{context}

Question: {question}

Answer:"#,
                profile = Self::profile_section(user_context, "User profile"),
                context = Self::context_blocks(chunks, language),
                question = question,
            ),
            (Language::English, PromptShape::GeneralKnowledge) => format!(
                r#"You are an AI assistant helping with career guidance and educational content.
I don't have specific context available for this question, so I'll provide a general response based on my knowledge.
{profile}
Question: {question}

Answer:"#,
                profile = Self::profile_section(user_context, "User profile"),
                question = question,
            ),
            (Language::Vietnamese, PromptShape::Grounded) => format!(
                r#"Bạn là một trợ lý AI chuyên về hướng nghiệp và giáo dục tại Việt Nam.
Chỉ sử dụng thông tin từ các nguồn được cung cấp để trả lời câu hỏi một cách chính xác và hữu ích.
Nếu thông tin không đủ, hãy nói rõ điều đó.
Giữ câu trả lời súc tích nhưng đầy đủ thông tin.
{profile}
Thông tin tham khảo:{context}

Câu hỏi: {question}

Trả lời:"#,
                profile = Self::profile_section(user_context, "Hồ sơ người dùng"),
                context = Self::context_blocks(chunks, language),
                question = question,
            ),
            (Language::Vietnamese, PromptShape::GeneralKnowledge) => format!(
                r#"Bạn là một trợ lý AI chuyên về hướng nghiệp và giáo dục tại Việt Nam.
Tôi không có thông tin cụ thể cho câu hỏi này, vì vậy tôi sẽ cung cấp câu trả lời chung dựa trên kiến thức của mình.
{profile}
Câu hỏi: {question}

Trả lời:"#,
                profile = Self::profile_section(user_context, "Hồ sơ người dùng"),
                question = question,
            ),
        };

        AnswerPrompt {
            text,
            shape,
            language,
        }
    }

    fn profile_section(user_context: Option<&str>, heading: &str) -> String {
        match user_context.map(str::trim).filter(|c| !c.is_empty()) {
            Some(context) => format!("\n{}:\n{}\n", heading, context),
            None => String::new(),
        }
    }

    /// Render chunks as `[Source N - label]:` blocks
    fn context_blocks(chunks: &[EvidenceChunk], language: Language) -> String {
        let mut context = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let (tag, label) = match language {
                Language::English => ("Source", chunk.label()),
                Language::Vietnamese => ("Nguồn", Self::vietnamese_label(chunk)),
            };
            context.push_str(&format!("\n[{} {} - {}]:\n{}\n", tag, i + 1, label, chunk.content));
        }
        context
    }

    fn vietnamese_label(chunk: &EvidenceChunk) -> String {
        let explicit = chunk
            .metadata
            .get("source")
            .and_then(MetadataValue::as_text)
            .or_else(|| chunk.source_url());
        match explicit {
            Some(label) => label.to_string(),
            None => "cơ sở dữ liệu".to_string(),
        }
    }

    /// Classifier prompt asking for one of two route labels
    pub fn routing_prompt(question: &str) -> String {
        format!(
            r#"You are an expert at routing a user question to a vectorstore or web search.
The vectorstore contains documents related to the CareerUP platform, career guidance, ILO assessments, university admissions and educational content.
Use the vectorstore for questions on these topics. For current events, news, or general knowledge questions, use web search.
Reply with exactly one word: vectorstore or web_search.

Question: {question}

{marker}"#,
            question = question,
            marker = ROUTE_MARKER,
        )
    }

    /// Yes/no prompt grading one chunk against the question
    pub fn relevance_prompt(question: &str, chunk: &EvidenceChunk) -> String {
        format!(
            r#"You are a grader assessing relevance of a retrieved document to a user question.
If the document contains keyword(s) or semantic meaning related to the question, grade it as relevant.
Give a binary score 'yes' or 'no' to indicate whether the document is relevant to the question.

Retrieved document:
{document}

User question: {question}

{marker}"#,
            document = chunk.content,
            question = question,
            marker = RELEVANCE_MARKER,
        )
    }

    /// Yes/no prompt checking a generation against the evidence it used
    pub fn groundedness_prompt(generation: &str, chunks: &[EvidenceChunk]) -> String {
        let facts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        format!(
            r#"You are a grader assessing whether an LLM generation is grounded in / supported by a set of retrieved facts.
Give a binary score 'yes' or 'no'. 'Yes' means that the answer is grounded in / supported by the set of facts.

Set of facts:
{facts}

LLM generation: {generation}

{marker}"#,
            facts = facts.join("\n\n"),
            generation = generation,
            marker = GROUNDED_MARKER,
        )
    }
}
