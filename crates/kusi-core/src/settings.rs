//! Store-wide settings, handed to a backend when it is opened.

use serde::Deserialize;

use crate::fields::Lang;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
  /// Language for content written without one, and read when a call does
  /// not name one. The empty string is the language-agnostic default.
  #[serde(default)]
  pub default_lang: String,
}

impl Settings {
  pub fn with_default_lang(lang: impl Into<String>) -> Self {
    Self {
      default_lang: lang.into(),
    }
  }

  /// The caller's selector, or the default language.
  pub fn resolve_lang(&self, lang: Option<Lang>) -> Lang {
    lang.unwrap_or_else(|| Lang::Code(self.default_lang.clone()))
  }
}
