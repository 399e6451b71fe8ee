use crate::{
    app::errors::AppError,
    config::{Config, Language},
    semantic::{SearchService, ServiceSettings},
};

/// One search service per enabled language.
pub struct AppService {
    config: Config,
    english: Option<SearchService>,
    hindi: Option<SearchService>,
}

impl AppService {
    /// Create services for every enabled language. Nothing is loaded until
    /// first use.
    pub fn new(config: Config) -> Self {
        let service_for = |language: Language| {
            config
                .languages
                .get(language)
                .enabled
                .then(|| SearchService::new(ServiceSettings::from_config(&config, language)))
        };

        let english = service_for(Language::English);
        let hindi = service_for(Language::Hindi);

        Self {
            config,
            english,
            hindi,
        }
    }

    #[cfg(test)]
    /// Create an app from prepared services, e.g. ones with a custom embedder.
    pub fn with_services(config: Config, services: Vec<SearchService>) -> Self {
        let mut app = Self {
            config,
            english: None,
            hindi: None,
        };
        for service in services {
            match service.language() {
                Language::English => app.english = Some(service),
                Language::Hindi => app.hindi = Some(service),
            }
        }
        app
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.config.bind_address = bind_address.into();
        self
    }

    pub fn service(&self, language: Language) -> Result<&SearchService, AppError> {
        let service = match language {
            Language::English => self.english.as_ref(),
            Language::Hindi => self.hindi.as_ref(),
        };
        service.ok_or(AppError::LanguageNotConfigured(language))
    }

    pub fn languages(&self) -> Vec<Language> {
        Language::ALL
            .into_iter()
            .filter(|lang| self.service(*lang).is_ok())
            .collect()
    }

    /// Initialize every configured language. Failures are logged.
    pub fn initialize_all(&self) {
        for language in self.languages() {
            let Ok(service) = self.service(language) else {
                continue;
            };
            match service.initialize() {
                Ok(()) => log::info!("{language} search service ready"),
                Err(e) => log::error!("Failed to initialize {language} search service: {e}"),
            }
        }
    }
}
