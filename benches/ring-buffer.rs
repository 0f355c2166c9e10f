use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use warbler::{constants::*, input::ring::ring};

const FRAME_BYTES: usize = STEREO_FRAME_SIZE * 4;

pub fn write_then_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("Ring Buffer");
    let chunk = vec![0x55u8; FRAME_BYTES];

    for frames in [1usize, 5, 50] {
        group.bench_with_input(
            BenchmarkId::new("Write + Read Frames", frames),
            &frames,
            |b, frames| {
                b.iter_batched_ref(
                    || {
                        let (writer, reader) = ring(RING_BUFFER_FRAMES * FRAME_BYTES);
                        (writer, reader, vec![0u8; FRAME_BYTES])
                    },
                    |(writer, reader, out)| {
                        for _ in 0..*frames {
                            black_box(writer.write(&chunk));
                            black_box(reader.read(out));
                        }
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    // Offsets chosen so that every read and write crosses the end of the buffer.
    group.bench_function("Wrapping Writes", |b| {
        b.iter_batched_ref(
            || {
                let (mut writer, mut reader) = ring(FRAME_BYTES * 3 / 2);
                let mut out = vec![0u8; FRAME_BYTES];
                writer.write(&chunk);
                reader.read(&mut out);
                (writer, reader, out)
            },
            |(writer, reader, out)| {
                for _ in 0..5 {
                    black_box(writer.write(&chunk));
                    black_box(reader.read(out));
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

pub fn threaded_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("Ring Buffer (Threaded)");
    let chunk = vec![0x55u8; FRAME_BYTES];

    group.bench_function("One Second of Audio", |b| {
        b.iter(|| {
            let (mut writer, mut reader) = ring(5 * FRAME_BYTES);
            let chunk = chunk.clone();

            let producer = std::thread::spawn(move || {
                let mut left = RING_BUFFER_FRAMES * FRAME_BYTES;
                while left > 0 {
                    let n = writer.write(&chunk[..left.min(FRAME_BYTES)]);
                    if n == 0 {
                        std::thread::yield_now();
                    }
                    left -= n;
                }
            });

            let mut out = vec![0u8; FRAME_BYTES];
            let mut got = 0;
            while got < RING_BUFFER_FRAMES * FRAME_BYTES {
                let n = reader.read(&mut out);
                if n == 0 {
                    std::thread::yield_now();
                }
                got += n;
            }

            producer.join().unwrap();
            black_box(got)
        })
    });

    group.finish();
}

criterion_group!(benches, write_then_read, threaded_transfer);
criterion_main!(benches);
