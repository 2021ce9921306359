//! 文字起こし・LLM・文単位感情判定APIのモックサーバー
//!
//! `reelsense` の設定で各ベースURLをこのサーバーに向けると、
//! 実際のAPIキーなしでバッチ分析を一通り動かせる。

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use warp::Filter;
use warp::http::StatusCode;

#[derive(Parser, Debug)]
#[command(name = "reelsense-mock-server", about = "Mock provider APIs for reelsense")]
struct Args {
    #[arg(long, default_value_t = 8089)]
    port: u16,

    /// 乱数シード（省略時は毎回異なる）
    #[arg(long)]
    seed: Option<u64>,

    /// リクエストを500で失敗させる確率 (0.0〜1.0)
    #[arg(long, default_value_t = 0.0)]
    fail_rate: f64,

    /// 応答前の遅延（ミリ秒）
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

const TRANSCRIPTS: &[&str] = &[
    "okay so I finally tried the viral serum. honestly this is amazing, my skin has never looked better. \
     the packaging is kinda mid but the results are fire, no cap!!",
    "we drove two hours for this burger. it was terrible. the fries were cold and the service was awful. \
     would not recommend, total waste of money",
    "here is my morning routine. I wake up at six, make coffee and check my email. \
     then I walk the dog around the block",
    "this phone case is so cute and the color is perfect. shipping took forever though, \
     and the first one arrived broken. customer support fixed it fast, so good overall",
];

const POSITIVE_WORDS: &[&str] = &["amazing", "fire", "perfect", "good", "love", "cute", "better", "great"];
const NEGATIVE_WORDS: &[&str] = &["terrible", "awful", "waste", "broken", "cold", "mid", "bad", "worst"];

#[derive(Clone)]
struct MockState {
    rng: Arc<Mutex<StdRng>>,
    fail_rate: f64,
    delay_ms: u64,
}

impl MockState {
    fn should_fail(&self) -> bool {
        self.fail_rate > 0.0
            && self
                .rng
                .lock()
                .map(|mut rng| rng.gen_bool(self.fail_rate.clamp(0.0, 1.0)))
                .unwrap_or(false)
    }

    fn jitter(&self, spread: f64) -> f64 {
        self.rng
            .lock()
            .map(|mut rng| rng.gen_range(-spread..=spread))
            .unwrap_or(0.0)
    }

    async fn delay(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

/// 単語の出現数で大まかな極性を返す（正なら肯定的）
fn polarity(text: &str) -> i32 {
    let lowered = text.to_lowercase();
    let count = |words: &[&str]| {
        words
            .iter()
            .map(|word| lowered.matches(word).count() as i32)
            .sum::<i32>()
    };
    count(POSITIVE_WORDS) - count(NEGATIVE_WORDS)
}

fn transcript_for(url: &str) -> &'static str {
    let index = url.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    TRANSCRIPTS[index % TRANSCRIPTS.len()]
}

fn as_vtt(text: &str) -> String {
    let mut vtt = String::from("WEBVTT\n\n");
    for (i, sentence) in text.split(". ").enumerate() {
        vtt.push_str(&format!(
            "{}\n00:00:{:02}.000 --> 00:00:{:02}.000\n{}\n\n",
            i + 1,
            i * 3,
            i * 3 + 3,
            sentence
        ));
    }
    vtt
}

fn error_reply(status: StatusCode, message: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
}

async fn handle_transcript(
    platform: &'static str,
    api_key: Option<String>,
    query: HashMap<String, String>,
    state: MockState,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, warp::Rejection> {
    state.delay().await;

    if api_key.as_deref().unwrap_or_default().is_empty() {
        return Ok(error_reply(StatusCode::UNAUTHORIZED, "missing x-api-key"));
    }
    let Some(url) = query.get("url") else {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "missing url"));
    };
    if url.contains("notfound") {
        return Ok(error_reply(StatusCode::NOT_FOUND, "transcript not found"));
    }
    if state.should_fail() {
        return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "random failure"));
    }

    let text = transcript_for(url);
    log::info!("📜 {} transcript for {}", platform, url);

    let body = match platform {
        "tiktok" => json!({ "success": true, "id": uuid::Uuid::new_v4().to_string(), "transcript": as_vtt(text) }),
        "instagram" => json!({ "success": true, "transcripts": [{ "id": uuid::Uuid::new_v4().to_string(), "text": text }] }),
        _ => json!({ "success": true, "transcript": [{ "text": text }], "transcript_only_text": text }),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::OK))
}

async fn handle_chat(
    body: Value,
    state: MockState,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, warp::Rejection> {
    state.delay().await;
    if state.should_fail() {
        return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "random failure"));
    }

    let prompt = body["messages"]
        .as_array()
        .and_then(|messages| messages.last())
        .and_then(|message| message["content"].as_str())
        .unwrap_or_default();

    let score = polarity(prompt);
    let (label, positive, negative) = match score {
        s if s > 0 => ("POSITIVE", 70.0, 10.0),
        s if s < 0 => ("NEGATIVE", 10.0, 70.0),
        _ => ("NEUTRAL", 20.0, 20.0),
    };
    let positive: f64 = positive + state.jitter(5.0);
    let negative: f64 = negative + state.jitter(5.0);
    let neutral = 100.0 - positive - negative;
    let confidence = 80.0 + state.jitter(10.0);

    // 実際のモデルと同じく前置きとコードフェンス付きで返す
    let content = format!(
        "Here is the analysis:\n```json\n{}\n```",
        json!({
            "sentiment": label,
            "confidence": confidence.round(),
            "scores": { "positive": positive.round(), "neutral": neutral.round(), "negative": negative.round() }
        })
    );

    let response = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": body["model"].as_str().unwrap_or("mock"),
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "total_tokens": 0 }
    });
    log::info!("🤖 chat completion: {}", label);
    Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK))
}

#[derive(Debug, Deserialize)]
struct SentimentRequest {
    #[serde(rename = "Text")]
    text: String,
}

async fn handle_sentiment(
    request: SentimentRequest,
    state: MockState,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, warp::Rejection> {
    state.delay().await;
    if state.should_fail() {
        return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "random failure"));
    }

    let (label, positive, negative, neutral, mixed) = match polarity(&request.text) {
        s if s > 0 => ("POSITIVE", 0.85, 0.05, 0.08, 0.02),
        s if s < 0 => ("NEGATIVE", 0.05, 0.85, 0.08, 0.02),
        _ => ("NEUTRAL", 0.1, 0.1, 0.78, 0.02),
    };

    let response = json!({
        "Sentiment": label,
        "SentimentScore": { "Positive": positive, "Negative": negative, "Neutral": neutral, "Mixed": mixed }
    });
    Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let state = MockState {
        rng: Arc::new(Mutex::new(rng)),
        fail_rate: args.fail_rate,
        delay_ms: args.delay_ms,
    };
    let with_state = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };

    let transcript_route = |segments: (&'static str, &'static str, &'static str), platform: &'static str| {
        warp::get()
            .and(warp::path(segments.0))
            .and(warp::path(segments.1))
            .and(warp::path(segments.2))
            .and(warp::path("transcript"))
            .and(warp::path::end())
            .and(warp::header::optional::<String>("x-api-key"))
            .and(warp::query::<HashMap<String, String>>())
            .and(with_state.clone())
            .and_then(move |api_key, query, state| handle_transcript(platform, api_key, query, state))
    };

    let tiktok = transcript_route(("v1", "tiktok", "video"), "tiktok");
    let instagram = transcript_route(("v2", "instagram", "media"), "instagram");
    let youtube = transcript_route(("v1", "youtube", "video"), "youtube");

    let chat = warp::post()
        .and(warp::path!("v1" / "chat" / "completions"))
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(handle_chat);

    let sentiment = warp::post()
        .and(warp::path!("v1" / "sentiment"))
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(handle_sentiment);

    let routes = tiktok
        .or(instagram)
        .or(youtube)
        .or(chat)
        .or(sentiment)
        .with(warp::log("reelsense_mock_server"));

    log::info!("🚀 Mock provider server running at http://127.0.0.1:{}", args.port);
    log::info!("   transcripts: /v1/tiktok/video/transcript, /v2/instagram/media/transcript, /v1/youtube/video/transcript");
    log::info!("   llm:         /v1/chat/completions (OPENAI_BASE_URL=http://127.0.0.1:{}/v1)", args.port);
    log::info!("   cloud nlp:   /v1/sentiment");

    warp::serve(routes).run(([127, 0, 0, 1], args.port)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polarity() {
        assert!(polarity("this is amazing and perfect") > 0);
        assert!(polarity("terrible and awful") < 0);
        assert_eq!(polarity("we walked home"), 0);
    }

    #[test]
    fn test_transcript_is_stable_per_url() {
        assert_eq!(transcript_for("https://youtu.be/a"), transcript_for("https://youtu.be/a"));
    }

    #[test]
    fn test_vtt_has_cues() {
        let vtt = as_vtt("first part. second part");
        assert!(vtt.starts_with("WEBVTT"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:03.000\nfirst part"));
        assert!(vtt.contains("second part"));
    }
}
