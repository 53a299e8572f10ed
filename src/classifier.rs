use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::deadline::CallBudget;
use crate::error::{Result, TutorError};
use crate::models::{ChatMessage, ChatRequest, ContentNeed, StudentProfile};
use crate::outcome::StageOutcome;
use crate::temporal::fold_accents;
use crate::transport::Transport;

const CASUAL_MARKERS: &[&str] = &[
    "ola",
    "oi",
    "bom dia",
    "boa tarde",
    "boa noite",
    "tudo bem",
    "como esta",
    "obrigado",
    "obrigada",
    "tchau",
    "ate logo",
    "que horas",
    "que dia",
    "quem e",
    "quando",
    "onde",
    "qual o meu nome",
];

const CURRICULUM_MARKERS: &[&str] = &[
    "matematica",
    "portugues",
    "ciencias",
    "historia",
    "geografia",
    "ingles",
    "fisica",
    "quimica",
    "exercicio",
    "exercicios",
    "problema",
    "problemas",
    "explicar",
    "explica",
    "como fazer",
    "o que e",
    "define",
    "definir",
    "resolver",
    "resolucao",
    "ajuda",
    "ajudar",
    "materia",
    "materias",
    "aula",
    "aulas",
    "teste",
    "exame",
    "avaliacao",
    "estudar",
    "estudo",
    "aprender",
    "ensinar",
    "ensina",
];

const CLASSIFIER_INSTRUCTIONS: &str = r#"ANÁLISE DE NECESSIDADE DE CONTEÚDOS:

Decide se precisas de conteúdos educacionais específicos da base de dados da escola para responder adequadamente.

Responde EXATAMENTE neste formato JSON:
{
  "needsContent": true/false,
  "keywords": ["palavra1", "palavra2"],
  "reasoning": "breve explicação de 1 linha"
}

QUANDO PRECISA de conteúdos (needsContent: true):
- Perguntas sobre matérias específicas (matemática, ciências, português, etc.)
- Pedidos de explicação de conceitos educacionais
- Exercícios ou problemas para resolver
- Preparação para testes/exames

QUANDO NÃO PRECISA de conteúdos (needsContent: false):
- Cumprimentos simples (olá, bom dia)
- Perguntas temporais (que horas são, que dia é hoje)
- Conversas casuais
- Agradecimentos
- Perguntas sobre o próprio aluno ou turma

Responde apenas o JSON, sem explicações extra."#;

/// Decides whether curated school material should back the answer.
///
/// One remote call with a keyword fallback. Classification never fails the
/// request: every remote failure resolves to the local heuristic.
pub struct ContentClassifier {
    tx: Arc<dyn Transport>,
    timeout: Duration,
    casual: Regex,
    curriculum: Vec<(&'static str, Regex)>,
}

impl ContentClassifier {
    pub fn new(tx: Arc<dyn Transport>, timeout: Duration) -> Self {
        let word = |m: &str| {
            Regex::new(&format!(r"\b{}\b", regex::escape(m))).expect("marker pattern must compile")
        };
        let casual_alternation = CASUAL_MARKERS
            .iter()
            .map(|m| regex::escape(m))
            .collect::<Vec<_>>()
            .join("|");

        Self {
            tx,
            timeout,
            casual: Regex::new(&format!(r"\b(?:{casual_alternation})\b"))
                .expect("casual pattern must compile"),
            curriculum: CURRICULUM_MARKERS.iter().map(|m| (*m, word(m))).collect(),
        }
    }

    pub async fn classify(
        &self,
        question: &str,
        student: &StudentProfile,
        personality: Option<&str>,
        model: &str,
        budget: &CallBudget,
    ) -> ContentNeed {
        tracing::info!("Classifying content need with {}", model);
        let child = budget.child(self.timeout);
        StageOutcome::degrade(self.remote(question, student, personality, model, &child).await)
            .or_fallback("classification", || self.local_fallback(question))
            .unwrap_or_else(|_| self.local_fallback(question))
    }

    async fn remote(
        &self,
        question: &str,
        student: &StudentProfile,
        personality: Option<&str>,
        model: &str,
        budget: &CallBudget,
    ) -> Result<ContentNeed> {
        let mut prompt = String::new();
        if let Some(p) = personality {
            prompt.push_str(p);
            prompt.push_str("\n\n");
        }
        if let Some(class) = &student.class_name {
            prompt.push_str(&format!("CONTEXTO: Aluno {} da turma {}", student.name, class));
            if let Some(grade) = &student.grade {
                prompt.push_str(&format!(" ({grade})"));
            }
            prompt.push('\n');
        }
        if let Some(adaptations) = &student.special_context {
            prompt.push_str(&format!("ADAPTAÇÕES: {adaptations}\n"));
        }
        prompt.push_str(&format!("\nPergunta do aluno: \"{question}\"\n\n"));
        prompt.push_str(CLASSIFIER_INSTRUCTIONS);

        let mut request = ChatRequest::new(model, vec![ChatMessage::system(prompt)]);
        request.temperature = 0.3;
        request.max_tokens = 500;
        request.response_format = Some(serde_json::json!({"type": "json_object"}));

        let result = self.tx.chat(&request, budget).await?;
        if result.text.trim().is_empty() {
            return Err(TutorError::Internal(
                "Classifier returned empty choices".to_string(),
            ));
        }

        let payload = strip_code_fences(&result.text);
        let need: ContentNeed = serde_json::from_str(payload).map_err(|e| {
            TutorError::Internal(format!(
                "Failed to deserialize classifier JSON: {e}. Raw: {payload}"
            ))
        })?;
        tracing::debug!(
            "Classifier: needs_content={} reasoning={}",
            need.needs_content,
            need.reasoning
        );
        Ok(need)
    }

    /// Keyword heuristic used whenever the remote classifier is unavailable
    pub fn local_fallback(&self, question: &str) -> ContentNeed {
        let q = fold_accents(&question.to_lowercase());

        if self.casual.is_match(&q) {
            return ContentNeed {
                needs_content: false,
                keywords: Vec::new(),
                reasoning: "Pergunta casual/social".to_string(),
            };
        }

        let matched: Vec<String> = self
            .curriculum
            .iter()
            .filter(|(_, re)| re.is_match(&q))
            .map(|(m, _)| m.to_string())
            .collect();
        if !matched.is_empty() {
            return ContentNeed {
                needs_content: true,
                keywords: matched,
                reasoning: "Pergunta educacional detectada".to_string(),
            };
        }

        let needs_content = question.chars().count() > 20 && !question.contains('?');
        ContentNeed {
            needs_content,
            keywords: if needs_content {
                question
                    .split_whitespace()
                    .next()
                    .map(|w| vec![w.to_string()])
                    .unwrap_or_default()
            } else {
                Vec::new()
            },
            reasoning: if needs_content {
                "Pergunta complexa".to_string()
            } else {
                "Pergunta simples".to_string()
            },
        }
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
