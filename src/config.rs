use crate::persona::VoiceName;

/// 运行时使用的默认凭据环境变量
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    // 音频设备配置
    pub capture_device: String,
    pub playback_device: String,
    pub playback_period_size: usize,
    pub output_gain: f32,

    // 网络配置
    pub ws_url: String,
    pub model: String,
    /// Outbound audio queue depth; blocks beyond it are dropped.
    pub outbound_queue: usize,

    // 凭据（运行时读取，不参与编译）
    pub api_key: String,

    // 默认人设
    pub voice_name: VoiceName,
    pub system_instruction: String,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 设备、网络和人设参数都在编译时从 config.toml 中读取，凭据在运行时读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            capture_device: env!("CAPTURE_DEVICE").to_string(),
            playback_device: env!("PLAYBACK_DEVICE").to_string(),
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE")
                .parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,
            output_gain: env!("OUTPUT_GAIN")
                .parse()
                .map_err(|_| "Failed to parse OUTPUT_GAIN")?,

            ws_url: env!("WS_URL").to_string(),
            model: env!("LIVE_MODEL").to_string(),
            outbound_queue: env!("OUTBOUND_QUEUE")
                .parse()
                .map_err(|_| "Failed to parse OUTBOUND_QUEUE")?,

            api_key: read_api_key(env!("API_KEY_ENV")),

            voice_name: env!("VOICE_NAME")
                .parse()
                .map_err(|_| "Failed to parse VOICE_NAME")?,
            system_instruction: env!("SYSTEM_INSTRUCTION").to_string(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            playback_period_size: 480,
            output_gain: 1.0,
            ws_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            outbound_queue: 16,
            api_key: read_api_key(DEFAULT_API_KEY_ENV),
            voice_name: VoiceName::default(),
            system_instruction: String::new(),
        }
    }
}

fn read_api_key(var: &str) -> String {
    std::env::var(var)
        .map(|key| key.trim().to_string())
        .unwrap_or_default()
}
