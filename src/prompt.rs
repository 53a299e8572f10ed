use crate::models::{ChatMessage, CuratedContent, Interaction, StudentProfile, TutorRequest};
use crate::tools::FINDINGS_HEADER;

const DEFAULT_PERSONALITY: &str = "És um tutor educacional especializado, amigável e motivador. A tua missão é ajudar estudantes a aprender de forma eficaz, explicando sempre os conceitos de maneira clara e didática.";

const DEFAULT_IMAGE_PROMPT: &str = "Analisa a imagem e explica de forma didática o que observas.";

const CLOSING_INSTRUCTIONS: &str = "INSTRUÇÕES:
- Responde sempre em português de Portugal (pt-PT)
- Usa o conteúdo educacional quando for relevante
- Considera o histórico para manter a continuidade
- Sê didático e motivador
- Adapta a linguagem ao nível da turma";

/// One optional section of the system instruction. Blocks render in the
/// order they were pushed; a block with nothing to say renders nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextBlock {
    Personality(PersonalitySource),
    Student {
        profile: StudentProfile,
        school_guidelines: Option<String>,
        class_guidelines: Option<String>,
    },
    CuratedContent(Vec<CuratedContent>),
    /// (question, truncated answer) pairs, oldest first
    History(Vec<(String, String)>),
    WebFindings(String),
    Closing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersonalitySource {
    Registry(String),
    Custom(String),
    Default,
}

/// Limits applied while assembling the history block
#[derive(Debug, Clone, Copy)]
pub struct HistoryLimits {
    pub window: usize,
    pub answer_preview_chars: usize,
}

pub fn personality_for(request: &TutorRequest) -> PersonalitySource {
    if let Some(p) = request
        .hierarchical_context
        .as_ref()
        .and_then(|h| h.registry_personality())
    {
        return PersonalitySource::Registry(p.to_string());
    }
    match request.effective_personality() {
        Some(p) => PersonalitySource::Custom(p.to_string()),
        None => PersonalitySource::Default,
    }
}

/// History block from interactions listed newest first
pub fn history_block(newest_first: &[Interaction], limits: HistoryLimits) -> ContextBlock {
    let mut entries: Vec<(String, String)> = newest_first
        .iter()
        .take(limits.window)
        .map(|i| (i.question.clone(), preview(&i.answer, limits.answer_preview_chars)))
        .collect();
    entries.reverse();
    ContextBlock::History(entries)
}

fn preview(answer: &str, max_chars: usize) -> String {
    if answer.chars().count() <= max_chars {
        return answer.to_string();
    }
    let cut: String = answer.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// Assemble the ordered block list for one run
pub fn build_blocks(
    request: &TutorRequest,
    student: &StudentProfile,
    content: &[CuratedContent],
    history_newest_first: &[Interaction],
    findings: &str,
    limits: HistoryLimits,
) -> Vec<ContextBlock> {
    let scope_guidelines = |scope: Option<&crate::models::ScopeContext>| {
        scope
            .and_then(|s| s.guidelines.as_deref())
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
    };
    let hierarchy = request.hierarchical_context.as_ref();

    vec![
        ContextBlock::Personality(personality_for(request)),
        ContextBlock::Student {
            profile: student.clone(),
            school_guidelines: scope_guidelines(hierarchy.and_then(|h| h.school.as_ref())),
            class_guidelines: scope_guidelines(hierarchy.and_then(|h| h.class.as_ref())),
        },
        ContextBlock::CuratedContent(content.to_vec()),
        history_block(history_newest_first, limits),
        ContextBlock::WebFindings(findings.to_string()),
        ContextBlock::Closing,
    ]
}

fn render_block(block: &ContextBlock) -> Option<String> {
    match block {
        ContextBlock::Personality(PersonalitySource::Registry(p)) => {
            Some(format!("PERSONALIDADE GLOBAL: {p}"))
        }
        ContextBlock::Personality(PersonalitySource::Custom(p)) => {
            Some(format!("PERSONALIDADE PERSONALIZADA: {p}"))
        }
        ContextBlock::Personality(PersonalitySource::Default) => Some(DEFAULT_PERSONALITY.to_string()),
        ContextBlock::Student {
            profile,
            school_guidelines,
            class_guidelines,
        } => {
            let mut out = String::new();
            if let Some(school) = &profile.school_name {
                out.push_str(&format!("ESCOLA: {school}\n"));
            }
            if let Some(class) = &profile.class_name {
                match &profile.grade {
                    Some(grade) => out.push_str(&format!("TURMA: {class} ({grade})\n")),
                    None => out.push_str(&format!("TURMA: {class}\n")),
                }
            }
            out.push_str(&format!("ESTUDANTE: {}", profile.name));
            if let Some(adaptations) = &profile.special_context {
                out.push_str(&format!("\nADAPTAÇÕES: {adaptations}"));
            }
            if let Some(g) = school_guidelines {
                out.push_str(&format!("\nDIRETRIZES DA ESCOLA: {g}"));
            }
            if let Some(g) = class_guidelines {
                out.push_str(&format!("\nDIRETRIZES DA TURMA: {g}"));
            }
            Some(out)
        }
        ContextBlock::CuratedContent(items) if !items.is_empty() => {
            let body = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    format!(
                        "{}. {} ({})\n   {}\n   Fonte: {}",
                        i + 1,
                        item.title,
                        item.subject.as_deref().unwrap_or("Geral"),
                        item.body,
                        item.source.as_deref().unwrap_or("Material da escola")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            Some(format!("CONTEÚDO EDUCACIONAL RELEVANTE:\n{body}"))
        }
        ContextBlock::History(entries) if !entries.is_empty() => {
            let body = entries
                .iter()
                .enumerate()
                .map(|(i, (q, a))| format!("{}. {}\n   Resposta: {}", i + 1, q, a))
                .collect::<Vec<_>>()
                .join("\n");
            Some(format!("HISTÓRICO RECENTE:\n{body}"))
        }
        ContextBlock::WebFindings(block) if !block.trim().is_empty() => Some(format!(
            "{}\n\nSe existir a secção \"{}\" acima, trata-a como a fonte mais recente e prioritária. Em caso de conflito com o teu conhecimento de treino, segue as informações atualizadas.",
            block.trim_end(),
            FINDINGS_HEADER
        )),
        ContextBlock::Closing => Some(CLOSING_INSTRUCTIONS.to_string()),
        ContextBlock::CuratedContent(_) | ContextBlock::History(_) | ContextBlock::WebFindings(_) => None,
    }
}

/// Render the system instruction
pub fn render(blocks: &[ContextBlock]) -> String {
    blocks
        .iter()
        .filter_map(render_block)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn user_message(question: &str, image_url: Option<&str>) -> ChatMessage {
    let question = question.trim();
    match image_url {
        Some(url) => {
            let text = if question.is_empty() {
                DEFAULT_IMAGE_PROMPT
            } else {
                question
            };
            ChatMessage::user_with_image(text, url)
        }
        None => ChatMessage::user(question),
    }
}
