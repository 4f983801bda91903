//! Environment configuration loading.

use std::env;

use serial_test::serial;

use dolores::ServerConfig;

fn set_required_credentials() {
    unsafe {
        env::set_var("DEEPGRAM_API_KEY", "dg-test");
        env::set_var("ELEVENLABS_API_KEY", "el-test");
        env::set_var("ELEVENLABS_VOICE_ID", "voice-test");
        env::set_var("OPENAI_API_KEY", "oa-test");
    }
}

fn cleanup_env_vars() {
    unsafe {
        env::remove_var("DEEPGRAM_API_KEY");
        env::remove_var("ELEVENLABS_API_KEY");
        env::remove_var("ELEVENLABS_VOICE_ID");
        env::remove_var("OPENAI_API_KEY");
        env::remove_var("OPENAI_BASE_URL");
        env::remove_var("OPENAI_MODEL");
        env::remove_var("TTS_VOICE");
        env::remove_var("STT_STREAMING");
        env::remove_var("LANGUAGE");
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("PLAYBACK_MUTE_MS");
        env::remove_var("INTERRUPT_MUTE_MS");
        env::remove_var("PLAYBACK_DONE_TIMEOUT_SECS");
    }
}

#[test]
#[serial]
fn defaults_with_required_credentials() {
    cleanup_env_vars();
    set_required_credentials();

    let config = ServerConfig::from_env().expect("Should load config");
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8765);
    assert_eq!(config.language, "nl");
    assert!(config.stt_streaming);
    assert_eq!(config.openai_model, "gpt-4o-mini");
    assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
    assert_eq!(config.playback_mute_ms, 500);
    assert_eq!(config.interrupt_mute_ms, 150);
    assert_eq!(config.playback_done_timeout_secs, 30);
    assert_eq!(config.address(), "0.0.0.0:8765");

    cleanup_env_vars();
}

#[test]
#[serial]
fn missing_credentials_fail_before_bind() {
    cleanup_env_vars();
    unsafe {
        env::set_var("DEEPGRAM_API_KEY", "dg-test");
        // TTS and LLM credentials absent on purpose.
    }

    let result = ServerConfig::from_env();
    assert!(result.is_err());
    let error = result.unwrap_err().to_string();
    assert!(error.contains("ELEVENLABS_API_KEY"));
    assert!(error.contains("OPENAI_API_KEY"));

    cleanup_env_vars();
}

#[test]
#[serial]
fn host_port_and_locale_overrides() {
    cleanup_env_vars();
    set_required_credentials();
    unsafe {
        env::set_var("HOST", "127.0.0.1");
        env::set_var("PORT", "9000");
        env::set_var("LANGUAGE", "en");
        env::set_var("STT_STREAMING", "false");
    }

    let config = ServerConfig::from_env().expect("Should load config");
    assert_eq!(config.address(), "127.0.0.1:9000");
    assert_eq!(config.language, "en");
    assert!(!config.stt_streaming);

    cleanup_env_vars();
}

#[test]
#[serial]
fn tts_voice_overrides_voice_id() {
    cleanup_env_vars();
    set_required_credentials();
    unsafe {
        env::set_var("TTS_VOICE", "override-voice");
    }

    let config = ServerConfig::from_env().expect("Should load config");
    assert_eq!(config.elevenlabs_voice_id, "override-voice");
    assert_eq!(config.tts_config().voice_id, "override-voice");

    cleanup_env_vars();
}

#[test]
#[serial]
fn zero_mute_window_is_rejected() {
    cleanup_env_vars();
    set_required_credentials();
    unsafe {
        env::set_var("PLAYBACK_MUTE_MS", "0");
    }

    let result = ServerConfig::from_env();
    assert!(result.is_err());
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("PLAYBACK_MUTE_MS")
    );

    cleanup_env_vars();
}

#[test]
#[serial]
fn invalid_port_is_rejected() {
    cleanup_env_vars();
    set_required_credentials();
    unsafe {
        env::set_var("PORT", "not-a-port");
    }

    let result = ServerConfig::from_env();
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Invalid port"));

    cleanup_env_vars();
}

#[test]
#[serial]
fn derived_provider_configs_carry_credentials() {
    cleanup_env_vars();
    set_required_credentials();

    let config = ServerConfig::from_env().expect("Should load config");
    assert_eq!(config.stt_config().api_key, "dg-test");
    assert_eq!(config.stt_config().language, "nl");
    assert_eq!(config.tts_config().api_key, "el-test");
    assert_eq!(config.llm_config().api_key, "oa-test");

    let timing = config.session_timing();
    assert_eq!(timing.playback_mute.as_millis(), 500);
    assert_eq!(timing.interrupt_mute.as_millis(), 150);
    assert_eq!(timing.playback_done_timeout.as_secs(), 30);

    cleanup_env_vars();
}
