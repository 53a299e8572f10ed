use regex::Regex;

/// Rewrites Markdown into the lightweight emphasis chat apps render.
///
/// Headings become `*Title*` (untitled ones are dropped), double/triple asterisk emphasis becomes
/// single, and runs of blank lines collapse to one. Applying it twice
/// gives the same text as applying it once.
pub struct ResponseNormalizer {
    empty_heading: Regex,
    heading: Regex,
    bold: Regex,
    blank_runs: Regex,
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseNormalizer {
    pub fn new() -> Self {
        Self {
            empty_heading: Regex::new(r"(?m)^[ \t]*#{1,6}[ \t*]*$").expect("empty heading pattern must compile"),
            heading: Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+\**([^\n]*?\S[^\n]*?)\**[ \t]*$")
                .expect("heading pattern must compile"),
            bold: Regex::new(r"\*{2,}([^*\n]+?)\*{2,}").expect("bold pattern must compile"),
            blank_runs: Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("blank-line pattern must compile"),
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        let text = text.replace("\r\n", "\n");
        let text = self.empty_heading.replace_all(&text, "");
        let text = self.heading.replace_all(&text, "*$1*");
        let text = self.bold.replace_all(&text, "*$1*");
        let text = self.blank_runs.replace_all(&text, "\n\n");
        text.trim().to_string()
    }
}
