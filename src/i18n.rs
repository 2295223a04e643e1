use serde::{Deserialize, Serialize};

/// UI languages supported by the dashboard. The backend itself is
/// language-agnostic; only the fixed assistant strings are localized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
}

impl Language {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "es" => Language::Es,
            _ => Language::En,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::En
    }
}

pub fn welcome(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "Hello! I'm your traceability assistant. Ask me anything about the garment data in the blockchain."
        }
        Language::Es => {
            "¡Hola! Soy tu asistente de trazabilidad. Pregúntame lo que quieras sobre los datos de las prendas en la blockchain."
        }
    }
}

/// Rendering of a structured backend error. Same prefix in both languages,
/// matching the production dashboard.
pub fn backend_error(_lang: Language, error: &str) -> String {
    format!("Error: {}", error)
}

pub fn could_not_process(lang: Language) -> &'static str {
    match lang {
        Language::En => "Sorry, I couldn't process your request. Please try again.",
        Language::Es => "Lo siento, no pude procesar tu solicitud. Por favor intenta de nuevo.",
    }
}

pub fn connection_error(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "Connection error. Please check that the server is running and try again."
        }
        Language::Es => {
            "Error de conexión. Por favor verifica que el servidor esté funcionando e intenta de nuevo."
        }
    }
}

pub fn hash_not_found(lang: Language) -> &'static str {
    match lang {
        Language::En => "No hash was found for the provided ticket.",
        Language::Es => "No se encontró hash para el tickbarr proporcionado.",
    }
}

pub fn need_one_filter(lang: Language) -> &'static str {
    match lang {
        Language::En => "Provide at least one filter (box number, client style, label or size).",
        Language::Es => "Debe proporcionar al menos un filtro (número de caja, estilo, etiqueta o talla).",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_from_code_defaults_to_english() {
        assert_eq!(Language::from_code("es"), Language::Es);
        assert_eq!(Language::from_code("ES "), Language::Es);
        assert_eq!(Language::from_code("en"), Language::En);
        assert_eq!(Language::from_code("fr"), Language::En);
        assert_eq!(Language::from_code(""), Language::En);
    }

    #[test]
    fn backend_error_keeps_prefix() {
        assert_eq!(
            backend_error(Language::Es, "sin datos"),
            "Error: sin datos"
        );
    }
}
