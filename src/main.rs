use std::sync::Arc;

use duplex_voice::audio::AlsaBackend;
use duplex_voice::{
    ChannelListener, Config, Persona, SessionEvent, SessionManager, SessionState, VoiceName, WsConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

const HELP: &str = "Commands: m = toggle mute, r = reconnect, v <voice> = switch voice, q = quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_else(|e| {
        log::warn!("Falling back to default configuration: {}", e);
        Config::default()
    });
    if config.api_key.is_empty() {
        log::warn!("No API key in {}, connect will fail", env!("API_KEY_ENV"));
    }

    let mut persona = Persona::new(config.system_instruction.clone(), config.voice_name);
    let backend = Arc::new(AlsaBackend::from_config(&config));
    let connector = Arc::new(WsConnector::new(&config.ws_url));
    let (listener, mut rx_event) = ChannelListener::new();
    let mut manager = SessionManager::new(config, backend, connector, Box::new(listener));

    println!("{} {} started. {}", env!("APP_NAME"), env!("APP_VERSION"), HELP);
    manager.connect(persona.clone()).await;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        // 没有活动会话时不驱动 pump，避免空转
        let active = manager.is_active();

        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            // 会话事件：状态、错误、字幕
            Some(event) = rx_event.recv() => print_event(&event),

            // 终端命令
            line = stdin.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        log::warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                        continue;
                    }
                };
                let mut words = line.split_whitespace();
                match words.next() {
                    Some("q") => break,
                    Some("m") => {
                        let muted = !manager.is_mic_muted();
                        manager.set_mic_muted(muted);
                        println!("Microphone {}", if muted { "muted" } else { "live" });
                    }
                    Some("r") => manager.connect(persona.clone()).await,
                    Some("v") => match words.next().map(str::parse::<VoiceName>) {
                        Some(Ok(voice)) => {
                            persona.voice = voice;
                            // 人设只在建立会话时生效
                            manager.connect(persona.clone()).await;
                        }
                        Some(Err(e)) => println!("{}", e),
                        None => println!("Current voice: {}", persona.voice),
                    },
                    Some(_) => println!("{}", HELP),
                    None => {}
                }
            }

            // 驱动会话：音频采集、网络消息、播放完成
            _ = manager.pump(), if active => {}
        }
    }

    manager.disconnect().await;
    while let Ok(event) = rx_event.try_recv() {
        print_event(&event);
    }
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::State(SessionState::Connected) => println!("[CONNECTED] Speak now."),
        SessionEvent::State(state) => println!("[{}]", state),
        SessionEvent::Error(message) => eprintln!("Error: {}", message),
        // 空片段不显示
        SessionEvent::Transcript(t) if t.text.is_empty() => {}
        SessionEvent::Transcript(t) if t.is_user => println!("You: {}", t.text),
        SessionEvent::Transcript(t) => println!("Model: {}", t.text),
    }
}
