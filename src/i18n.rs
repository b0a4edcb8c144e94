//! Translation tables for user-facing strings.
//!
//! Loaded once at startup and handed to components as `Arc<Locale>`.

use std::collections::HashMap;

use once_cell::sync::Lazy;

type Table = HashMap<&'static str, &'static str>;

static EN: Lazy<Table> = Lazy::new(|| {
    HashMap::from([
        ("tab.summarize", "Summarize"),
        ("tab.rephrase", "Rephrase"),
        ("tab.translate", "Translate"),
        ("tab.discuss", "Discuss"),
        ("tab.highlight", "Highlight"),
        ("button.summarize", "Summarize"),
        ("button.rephrase", "Rephrase"),
        ("button.translate", "Translate"),
        ("button.discuss", "Send"),
        ("button.highlight", "Highlight"),
        ("busy.summarize", "Summarizing…"),
        ("busy.rephrase", "Rephrasing…"),
        ("busy.translate", "Translating…"),
        ("busy.discuss", "Thinking…"),
        ("busy.highlight", "Finding key sentences…"),
        ("result.loading", "Working on it…"),
        ("error.no_text", "No text selected. Select some text first."),
        ("error.not_configured", "Gemini API key is not configured."),
        ("error.same_languages", "Source and target languages cannot be the same."),
        ("error.missing_target", "Choose a target language first."),
        ("error.failed", "Request failed: {error}"),
        ("error.unauthenticated", "The API key was rejected: {error}"),
        ("error.model_unavailable", "The model is not available right now: {error}"),
        ("error.rate_limited", "Too many requests, try again shortly: {error}"),
        ("error.bad_request", "The request was not accepted: {error}"),
        ("link.open_settings", "Open settings"),
        ("label.selected", "Selected"),
        ("label.style", "Style"),
        ("label.length", "Length"),
        ("label.preserve", "Keep formatting"),
        ("label.source", "From"),
        ("label.target", "To"),
        ("label.swap", "Swap"),
        ("label.auto", "Auto-detect"),
        ("label.detected", "Detected: {lang}"),
        ("label.length_delta", "{delta} characters"),
        ("label.compression", "{percent}% of original"),
        ("label.ask", "Ask about the selection"),
        ("label.you", "You"),
        ("label.assistant", "Gemini"),
        ("label.expand", "Expand"),
        ("label.pin", "Pin"),
        ("label.unpin", "Unpin"),
        ("label.close", "Close"),
        ("label.highlights", "{count} key sentences highlighted"),
        ("style.formal", "Formal"),
        ("style.casual", "Casual"),
        ("style.concise", "Concise"),
        ("style.friendly", "Friendly"),
        ("length.short", "Short"),
        ("length.medium", "Medium"),
        ("length.long", "Long"),
        ("discuss.default_question", "What does this mean?"),
        ("status.favorite_saved", "Saved to favorites"),
        ("status.favorite_duplicate", "Already in favorites"),
        ("status.copied", "Copied result to clipboard"),
        ("status.busy", "Another operation is still running"),
        ("status.key_saved", "API key saved"),
        ("status.nothing_to_save", "No finished result yet"),
        ("prompt.api_key", "Gemini API key (Enter to save, Esc to cancel)"),
        ("footer.page", "drag/shift+arrows select · Tab popup · 1-4 actions · f favorite · q quit"),
        ("footer.popup", "←/→ tabs · Enter run · o option · s swap · e expand · p pin · c copy · Esc close"),
    ])
});

static DE: Lazy<Table> = Lazy::new(|| {
    HashMap::from([
        ("tab.summarize", "Zusammenfassen"),
        ("tab.rephrase", "Umformulieren"),
        ("tab.translate", "Übersetzen"),
        ("tab.discuss", "Diskutieren"),
        ("tab.highlight", "Hervorheben"),
        ("button.summarize", "Zusammenfassen"),
        ("button.rephrase", "Umformulieren"),
        ("button.translate", "Übersetzen"),
        ("button.discuss", "Senden"),
        ("button.highlight", "Hervorheben"),
        ("busy.summarize", "Fasse zusammen…"),
        ("busy.rephrase", "Formuliere um…"),
        ("busy.translate", "Übersetze…"),
        ("busy.discuss", "Denke nach…"),
        ("busy.highlight", "Suche Kernsätze…"),
        ("result.loading", "Wird bearbeitet…"),
        ("error.no_text", "Kein Text ausgewählt. Bitte zuerst Text markieren."),
        ("error.not_configured", "Es ist kein Gemini-API-Schlüssel konfiguriert."),
        ("error.same_languages", "Quell- und Zielsprache dürfen nicht gleich sein."),
        ("error.missing_target", "Bitte zuerst eine Zielsprache wählen."),
        ("error.failed", "Anfrage fehlgeschlagen: {error}"),
        ("error.unauthenticated", "Der API-Schlüssel wurde abgelehnt: {error}"),
        ("error.model_unavailable", "Das Modell ist gerade nicht verfügbar: {error}"),
        ("error.rate_limited", "Zu viele Anfragen, bitte gleich erneut versuchen: {error}"),
        ("error.bad_request", "Die Anfrage wurde nicht akzeptiert: {error}"),
        ("link.open_settings", "Einstellungen öffnen"),
        ("label.selected", "Auswahl"),
        ("label.style", "Stil"),
        ("label.length", "Länge"),
        ("label.preserve", "Formatierung behalten"),
        ("label.source", "Von"),
        ("label.target", "Nach"),
        ("label.swap", "Tauschen"),
        ("label.auto", "Automatisch"),
        ("label.detected", "Erkannt: {lang}"),
        ("label.length_delta", "{delta} Zeichen"),
        ("label.compression", "{percent}% des Originals"),
        ("label.ask", "Frage zur Auswahl"),
        ("label.you", "Du"),
        ("label.close", "Schließen"),
        ("label.expand", "Erweitern"),
        ("label.pin", "Anheften"),
        ("label.unpin", "Lösen"),
        ("label.highlights", "{count} Kernsätze hervorgehoben"),
        ("style.formal", "Förmlich"),
        ("style.casual", "Locker"),
        ("style.concise", "Knapp"),
        ("style.friendly", "Freundlich"),
        ("length.short", "Kurz"),
        ("length.medium", "Mittel"),
        ("length.long", "Lang"),
        ("discuss.default_question", "Was bedeutet das?"),
        ("status.favorite_saved", "Zu Favoriten hinzugefügt"),
        ("status.favorite_duplicate", "Bereits in den Favoriten"),
        ("status.copied", "Ergebnis in die Zwischenablage kopiert"),
        ("status.busy", "Es läuft noch eine andere Anfrage"),
        ("status.key_saved", "API-Schlüssel gespeichert"),
        ("status.nothing_to_save", "Noch kein fertiges Ergebnis"),
        ("prompt.api_key", "Gemini-API-Schlüssel (Enter speichert, Esc bricht ab)"),
    ])
});

#[derive(Debug, Clone)]
pub struct Locale {
    lang: String,
    table: &'static Table,
}

impl Locale {
    /// Unknown languages fall back to English.
    pub fn load(lang: &str) -> Self {
        let lang = lang.split(['-', '_']).next().unwrap_or("en").to_ascii_lowercase();
        let table: &'static Table = match lang.as_str() {
            "de" => &*DE,
            _ => &*EN,
        };
        Self { lang, table }
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Looks up `key`; falls back to English, then to the key itself.
    pub fn t(&self, key: &str) -> String {
        self.table
            .get(key)
            .or_else(|| EN.get(key))
            .map(|s| s.to_string())
            .unwrap_or_else(|| key.to_string())
    }

    /// Like [`Locale::t`] with `{name}` placeholders substituted.
    pub fn tf(&self, key: &str, args: &[(&str, &str)]) -> String {
        let mut out = self.t(key);
        for (name, value) in args {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::load("en")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_english_then_key() {
        let de = Locale::load("de-AT");
        assert_eq!(de.lang(), "de");
        assert_eq!(de.t("tab.translate"), "Übersetzen");
        assert_eq!(de.t("label.assistant"), "Gemini");
        assert_eq!(de.t("no.such.key"), "no.such.key");
    }

    #[test]
    fn substitutes_placeholders() {
        let en = Locale::load("xx");
        assert_eq!(en.tf("error.failed", &[("error", "boom")]), "Request failed: boom");
    }
}
