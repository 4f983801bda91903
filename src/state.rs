//! Application state shared across handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ServerConfig;
use crate::core::llm::OpenAiLlm;
use crate::core::session::Providers;
use crate::core::speaker::SpeakerGate;
use crate::core::stt::DeepgramConnector;
use crate::core::tts::ElevenLabsTts;
use crate::server::SessionRegistry;

pub struct AppState {
    pub config: ServerConfig,
    pub providers: Providers,
    pub speaker: SpeakerGate,
    pub registry: SessionRegistry,
    session_seq: AtomicU64,
}

impl AppState {
    /// Build shared state with the real upstream providers. Fails when a
    /// provider rejects its configuration, which `ServerConfig::from_env`
    /// should already have prevented.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let stt = DeepgramConnector::new(config.stt_config())?;
        let llm = OpenAiLlm::new(config.llm_config())?;
        let tts = ElevenLabsTts::new(config.tts_config())?;

        let providers = Providers {
            stt: Arc::new(stt),
            llm: Arc::new(llm),
            tts: Arc::new(tts),
        };

        Ok(Arc::new(Self {
            config,
            providers,
            speaker: SpeakerGate::unconfigured(),
            registry: SessionRegistry::new(),
            session_seq: AtomicU64::new(0),
        }))
    }

    /// Next unique session id.
    pub fn next_session_id(&self) -> u64 {
        self.session_seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}
