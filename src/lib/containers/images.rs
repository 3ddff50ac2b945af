use std::collections::HashMap;

use super::types::CONTAINER_WORKDIR;
use crate::lib::{submissions::types::Language, workspace::SOURCE_FILE_NAME};

/// Image and run command used for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageImage {
    pub tag: String,
    pub command: Vec<String>,
}

/// Language to image mapping. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ImageTable {
    images: HashMap<Language, LanguageImage>,
}

impl ImageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults() -> Self {
        let mut table = ImageTable::new();
        for language in Language::ALL {
            table = table.with(language, default_image(language));
        }
        table
    }

    pub fn with(mut self, language: Language, image: LanguageImage) -> Self {
        self.images.insert(language, image);
        self
    }

    pub fn get(&self, language: Language) -> Option<&LanguageImage> {
        self.images.get(&language)
    }
}

fn default_image(language: Language) -> LanguageImage {
    match language {
        Language::CSharp => LanguageImage {
            tag: "mcr.microsoft.com/dotnet/sdk:8.0".to_string(),
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!(
                    "cd /tmp && dotnet new console -o app >/dev/null \
                     && cp {CONTAINER_WORKDIR}/{SOURCE_FILE_NAME} app/Program.cs \
                     && dotnet run --project app"
                ),
            ],
        },
        Language::Python => LanguageImage {
            tag: "python:3.9.19".to_string(),
            command: vec!["python".to_string(), SOURCE_FILE_NAME.to_string()],
        },
    }
}
