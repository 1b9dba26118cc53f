//! Codec and frame-parsing benchmarks
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use base64::prelude::*;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;
use voice_bridge::core::codec::{
    decode_mulaw_buffer, encode_mulaw_buffer, mulaw_to_pcm16k, pcm24k_to_mulaw,
    resample_down_24k_to_8k, resample_up_8k_to_16k, samples_to_pcm16le,
};
use voice_bridge::core::realtime::gemini::ServerMessage;

fn sine(len: usize, rate: f32) -> Vec<i16> {
    (0..len)
        .map(|i| ((i as f32 * 440.0 * std::f32::consts::TAU / rate).sin() * 12_000.0) as i16)
        .collect()
}

/// G.711 table lookups and the encoder
fn bench_mulaw(c: &mut Criterion) {
    let mut group = c.benchmark_group("mulaw");
    group.measurement_time(Duration::from_secs(5));

    for ms in [20usize, 100, 1000] {
        let samples = sine(ms * 8, 8000.0);
        let encoded = encode_mulaw_buffer(&samples);

        group.throughput(Throughput::Elements(samples.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", ms), &samples, |b, s| {
            b.iter(|| encode_mulaw_buffer(black_box(s)));
        });
        group.bench_with_input(BenchmarkId::new("decode", ms), &encoded, |b, e| {
            b.iter(|| decode_mulaw_buffer(black_box(e)));
        });
    }

    group.finish();
}

fn bench_resampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");

    let narrow = sine(1600, 8000.0);
    group.throughput(Throughput::Elements(narrow.len() as u64));
    group.bench_function("up_8k_to_16k_200ms", |b| {
        b.iter(|| resample_up_8k_to_16k(black_box(&narrow)));
    });

    let wide = sine(4800, 24_000.0);
    group.throughput(Throughput::Elements(wide.len() as u64));
    group.bench_function("down_24k_to_8k_200ms", |b| {
        b.iter(|| resample_down_24k_to_8k(black_box(&wide)));
    });

    group.finish();
}

/// Full per-chunk paths: AI output to the phone and caller audio to the AI
fn bench_pipelines(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    let ai_chunk = samples_to_pcm16le(&sine(960, 24_000.0));
    group.throughput(Throughput::Bytes(ai_chunk.len() as u64));
    group.bench_function("pcm24k_to_mulaw_40ms", |b| {
        b.iter(|| pcm24k_to_mulaw(black_box(&ai_chunk)));
    });

    let caller_frame = encode_mulaw_buffer(&sine(160, 8000.0));
    group.throughput(Throughput::Bytes(caller_frame.len() as u64));
    group.bench_function("mulaw_to_pcm16k_20ms", |b| {
        b.iter(|| mulaw_to_pcm16k(black_box(&caller_frame)));
    });

    group.finish();
}

fn bench_server_frame_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("server_frames");

    let audio = BASE64_STANDARD.encode(samples_to_pcm16le(&sine(960, 24_000.0)));
    let audio_frame = format!(
        r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{audio}"}}}}]}}}}}}"#
    );
    let transcript_frame = r#"{"serverContent":{"outputTranscription":{"text":"Our opening hours are nine to five."}}}"#;

    group.throughput(Throughput::Bytes(audio_frame.len() as u64));
    group.bench_function("audio_delta", |b| {
        b.iter(|| ServerMessage::parse(black_box(&audio_frame)));
    });
    group.throughput(Throughput::Bytes(transcript_frame.len() as u64));
    group.bench_function("transcription", |b| {
        b.iter(|| ServerMessage::parse(black_box(transcript_frame)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_mulaw,
    bench_resampling,
    bench_pipelines,
    bench_server_frame_parsing,
);
criterion_main!(benches);
