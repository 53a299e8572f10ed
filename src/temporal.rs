use chrono::Datelike;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use regex::Regex;

use crate::tools::ToolKind;

/// Verdict on whether a question needs information newer than the model's training data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalIntent {
    /// News-style question about what is happening now
    pub current_events: bool,
    /// Explicit price/quote question; answered by a general search, not news
    pub price_query: bool,
    /// Search order for the priority executor
    pub priority: Vec<ToolKind>,
}

impl TemporalIntent {
    pub fn requires_live_data(&self) -> bool {
        self.current_events || self.price_query
    }

    /// Verdict for questions that must never trigger web lookups (image questions)
    pub fn offline() -> Self {
        Self {
            current_events: false,
            price_query: false,
            priority: vec![ToolKind::Encyclopedia, ToolKind::General],
        }
    }
}

const ROLE: &str = "presidente";

/// Pattern rules for time-sensitive questions.
///
/// Rules are written against lowercase, accent-folded text. Educational
/// phrasing wins over every live-data rule.
pub struct TemporalIntentDetector {
    live_rules: Vec<Regex>,
    holder_rule: Regex,
    historic_suffix: Regex,
    educational_rules: Vec<Regex>,
    price_rules: Vec<Regex>,
    us_entity: Regex,
    matcher: SkimMatcherV2,
}

impl Default for TemporalIntentDetector {
    fn default() -> Self {
        Self::new(chrono::Utc::now().year())
    }
}

impl TemporalIntentDetector {
    /// `reference_year` and the year before it count as recency tokens
    pub fn new(reference_year: i32) -> Self {
        let compile = |p: &str| Regex::new(p).expect("static temporal pattern must compile");

        let live_rules = vec![
            compile(r"\b(hoje|agora|atualmente|neste momento|recentemente)\b"),
            compile(r"\b(noticias?|manchetes?|headlines?|ultimas?|novas?)\s+(de\s+)?(hoje|recentes?|atua(l|is))\b"),
            compile(r"\b(o que|que)\s+(aconteceu|esta acontecendo|acontece)\s+(hoje|agora|recentemente|no mundo)\b"),
            compile(r"\b(ultimas?\s+)?(noticias?|novidades?)\s+(do\s+|de\s+)?(brasil|mundo|pais|portugal)\b"),
            compile(r"\b(breaking|urgente|flash|ao vivo|live)\s+(news|noticias?)\b"),
            compile(r"\b(janeiro|fevereiro|marco|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro)\b"),
            compile(&format!(r"\b({}|{})\b", reference_year, reference_year - 1)),
            compile(r"\b(ontem|esta semana|este mes|semana passada|mes passado)\b"),
            compile(r"\b(presidente|eleicao|posse|mandato|governo|ministro|lider)\s+(atual|novo|nova|recente)\b"),
            compile(r"\b(clima|tempo|temperatura)\s+(de\s+)?(hoje|agora|atual)\b"),
            compile(r"\b(resultado|placar|quem ganhou|quem venceu)\s+(de\s+)?(hoje|ontem|recente)\b"),
            compile(r"\b(descoberta|pesquisa|estudo)\s+(recente|nova|novo)\b"),
        ];

        let educational_rules = vec![
            compile(r"\bcomo\s+(resolver|calcular|fazer|estudar|aprender)\b"),
            compile(r"\b(o que e|definicao|conceito|explicacao)\b"),
            compile(r"\b(exercicios?|problemas?|prova|teste|exame)\b"),
        ];

        let price_rules = vec![
            compile(r"\b(preco|cotacao|valor|cambio)\s+(do\s+|da\s+|de\s+)?(dolar|euro|bitcoin|real|libra|usd|eur|brl|btc)\b"),
            compile(r"\bcambio\s+(de\s+)?(hoje|atual|agora)\b"),
        ];

        Self {
            live_rules,
            holder_rule: compile(
                r"\bquem\s+e\s+(o|a)\s+(atual\s+)?(presidente|ministro|ministra|lider|primeiro\s+ministro|prefeito|governador)\b",
            ),
            historic_suffix: compile(r"^\s+(da|do)\s+historia\b"),
            educational_rules,
            price_rules,
            us_entity: compile(r"\b(eua|estados\s+unidos|usa|united\s+states)\b"),
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn detect(&self, question: &str) -> TemporalIntent {
        let q = fold_accents(&question.to_lowercase());

        let educational = self.educational_rules.iter().any(|r| r.is_match(&q));
        let price = self.price_rules.iter().any(|r| r.is_match(&q));
        let live = self.live_rules.iter().any(|r| r.is_match(&q))
            || self.is_holder_query(&q)
            || self.is_misspelled_us_president(&q);

        let current_events = live && !price && !educational;
        let price_query = price && !educational;

        let priority = if current_events {
            vec![ToolKind::News, ToolKind::Encyclopedia]
        } else if price_query {
            vec![ToolKind::General, ToolKind::Encyclopedia]
        } else {
            vec![ToolKind::Encyclopedia, ToolKind::General]
        };

        if educational && (live || price) {
            tracing::debug!("Educational phrasing suppressed live-data rules for: {}", question);
        }

        TemporalIntent {
            current_events,
            price_query,
            priority,
        }
    }

    fn is_holder_query(&self, q: &str) -> bool {
        self.holder_rule
            .find_iter(q)
            .any(|m| !self.historic_suffix.is_match(&q[m.end()..]))
    }

    /// "presiudente dos eua", "presidnte dos estados unidos", ...
    fn is_misspelled_us_president(&self, q: &str) -> bool {
        if !self.us_entity.is_match(q) {
            return false;
        }
        q.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .any(|token| self.looks_like_role(token))
    }

    fn looks_like_role(&self, token: &str) -> bool {
        if token.starts_with("presi") {
            return true;
        }
        let len_gap = token.chars().count().abs_diff(ROLE.len());
        if len_gap > 2 || !token.starts_with('p') {
            return false;
        }
        self.matcher.fuzzy_match(ROLE, token).is_some()
            || self.matcher.fuzzy_match(token, ROLE).is_some()
    }
}

/// Strip Portuguese diacritics so rules do not need accented alternatives
pub fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}
