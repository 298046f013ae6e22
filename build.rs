use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    network: Network,
    persona: Persona,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    playback_period_size: usize,
    output_gain: f32,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    model: String,
    api_key_env: String,
    outbound_queue: usize,
}

#[derive(Deserialize)]
struct Persona {
    voice_name: String,
    system_instruction: String,
}

// rustc-env 的值不能跨行
fn single_line(value: &str) -> String {
    value.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频设备配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!(
        "cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}",
        config.audio.playback_period_size
    );
    println!("cargo:rustc-env=OUTPUT_GAIN={}", config.audio.output_gain);

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=LIVE_MODEL={}", config.network.model);
    println!("cargo:rustc-env=API_KEY_ENV={}", config.network.api_key_env);
    println!("cargo:rustc-env=OUTBOUND_QUEUE={}", config.network.outbound_queue);

    // 默认人设
    println!("cargo:rustc-env=VOICE_NAME={}", config.persona.voice_name);
    println!(
        "cargo:rustc-env=SYSTEM_INSTRUCTION={}",
        single_line(&config.persona.system_instruction)
    );
}
