use chrono::{DateTime, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sendersweep::archive::format::content_digest;
use sendersweep::group;
use sendersweep::model::{EmailAddress, Header, Message, MessageBody};

fn mailbox(n: usize, senders: usize) -> Vec<Message> {
    (0..n)
        .map(|i| {
            let from = format!("Sender {} <user{}@Domain{}.example>", i % senders, i % senders, i % 7);
            Message {
                id: format!("m{i:06}"),
                sender: EmailAddress::parse(&from),
                headers: vec![
                    Header::new("From", from.clone()),
                    Header::new("Subject", format!("Newsletter #{i}")),
                ],
                body: MessageBody {
                    text: Some("Lorem ipsum dolor sit amet. ".repeat(40)),
                    html: None,
                },
                attachments: Vec::new(),
                received_at: DateTime::<Utc>::UNIX_EPOCH,
            }
        })
        .collect()
}

fn bench_group(c: &mut Criterion) {
    let messages = mailbox(500, 60);
    c.bench_function("group_500_messages", |b| {
        b.iter(|| group::group(black_box(&messages)))
    });
    c.bench_function("group_500_by_size", |b| {
        b.iter(|| group::group(black_box(&messages)).by_size().len())
    });
}

fn bench_digest(c: &mut Criterion) {
    let messages = mailbox(50, 5);
    c.bench_function("content_digest_50", |b| {
        b.iter(|| {
            messages
                .iter()
                .map(|m| content_digest(black_box(m)).len())
                .sum::<usize>()
        })
    });
}

criterion_group!(benches, bench_group, bench_digest);
criterion_main!(benches);
