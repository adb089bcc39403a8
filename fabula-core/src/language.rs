//! Story languages and the localized text the story pipeline feeds to the
//! models or shows in place of a failed narration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Placeholder replaced by the story text inside an image prompt template.
const STORY_TEXT_MARKER: &str = "[STORY_TEXT]";

/// Language a story is told in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Pt,
    En,
    Es,
}

/// Pipeline-facing strings for one language.
#[derive(Debug, Clone, Copy)]
pub struct StoryTexts {
    pub system_instruction: &'static str,
    pub initial_message: &'static str,
    pub speech_prompt_prefix: &'static str,
    pub image_prompt_template: &'static str,
    /// Shown as the narrator turn when the chat model fails.
    pub story_error: &'static str,
    /// Shown when spoken input could not be turned into text.
    pub model_response_error: &'static str,
}

const PT: StoryTexts = StoryTexts {
    system_instruction: "Você é um contador de histórias amigável e criativo para crianças de 3 a 8 anos. \
        Mantenha suas histórias simples, curtas (2-4 frases por resposta), positivas e cheias de encanto. \
        Termine cada resposta com uma pergunta para incentivar a criança a continuar a história, \
        como \"O que você acha que aconteceu depois?\".",
    initial_message: "Olá! Eu posso te contar uma história. Sobre o que nossa história deve ser hoje?",
    speech_prompt_prefix: "Diga com uma voz gentil e alegre:",
    image_prompt_template: "Uma ilustração de livro de histórias infantil fofa e colorida de: [STORY_TEXT]. \
        Estilo de aquarela suave. Sem texto, sem palavras.",
    story_error: "Oh, céus! Tive um bloqueio de escritor. Você poderia perguntar de novo?",
    model_response_error: "Opa, eu me enrolei um pouco. Você poderia tentar me dizer isso de novo?",
};

const EN: StoryTexts = StoryTexts {
    system_instruction: "You are a friendly and creative storyteller for children aged 3-8. \
        Keep your stories simple, short (2-4 sentences per response), positive, and full of charm. \
        End each response with a question to encourage the child to continue the story, \
        like \"What do you think happened next?\".",
    initial_message: "Hello! I can tell you a story. What should our story be about today?",
    speech_prompt_prefix: "Say in a gentle and cheerful voice:",
    image_prompt_template: "A cute and colorful children's storybook illustration of: [STORY_TEXT]. \
        Soft watercolor style. No text, no words.",
    story_error: "Oh, dear! I have writer's block. Could you ask again?",
    model_response_error: "Oops, I got a little tangled up. Could you try telling me that again?",
};

const ES: StoryTexts = StoryTexts {
    system_instruction: "Eres un cuentacuentos amigable y creativo para niños de 3 a 8 años. \
        Mantén tus historias simples, cortas (2-4 frases por respuesta), positivas y llenas de encanto. \
        Termina cada respuesta con una pregunta para animar al niño a continuar la historia, \
        como \"¿Qué crees que pasó después?\".",
    initial_message: "¡Hola! Puedo contarte una historia. ¿Sobre qué debería ser nuestra historia de hoy?",
    speech_prompt_prefix: "Di con una voz suave y alegre:",
    image_prompt_template: "Una ilustración de libro de cuentos infantil, linda y colorida de: [STORY_TEXT]. \
        Estilo de acuarela suave. Sin texto, sin palabras.",
    story_error: "¡Oh, cielos! Tengo un bloqueo de escritor. ¿Podrías preguntar de nuevo?",
    model_response_error: "Uy, me enredé un poco. ¿Podrías intentar decírmelo de nuevo?",
};

impl Language {
    /// All supported languages.
    pub const ALL: [Language; 3] = [Language::Pt, Language::En, Language::Es];

    /// Primary language subtag (`pt`, `en`, `es`).
    pub fn tag(self) -> &'static str {
        match self {
            Language::Pt => "pt",
            Language::En => "en",
            Language::Es => "es",
        }
    }

    pub fn texts(self) -> &'static StoryTexts {
        match self {
            Language::Pt => &PT,
            Language::En => &EN,
            Language::Es => &ES,
        }
    }

    /// English name, used when instructing the models.
    pub fn english_name(self) -> &'static str {
        match self {
            Language::Pt => "Portuguese",
            Language::En => "English",
            Language::Es => "Spanish",
        }
    }

    /// Prompt sent alongside a recording of the user's voice.
    pub fn transcription_prompt(self) -> String {
        format!(
            "Transcribe this recording of a child speaking {}. \
             Reply with the transcript only, or nothing if no words are spoken.",
            self.english_name()
        )
    }

    /// Prompt sent to the speech model for `story_text`.
    pub fn speech_prompt(self, story_text: &str) -> String {
        format!("{} {}", self.texts().speech_prompt_prefix, story_text)
    }

    /// Prompt sent to the image models for `story_text`.
    pub fn image_prompt(self, story_text: &str) -> String {
        self.texts()
            .image_prompt_template
            .replace(STORY_TEXT_MARKER, story_text)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    /// Accepts a bare subtag or a full tag such as `pt-BR` / `en_US`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let primary = s
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "pt" => Ok(Language::Pt),
            "en" => Ok(Language::En),
            "es" => Ok(Language::Es),
            _ => Err(ConfigError::Invalid {
                message: format!("unsupported language '{}' (expected pt, en or es)", s),
            }),
        }
    }
}
