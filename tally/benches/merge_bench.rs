use audit_crypto::{digest, HashAlgorithm};
use audit_tally::{MemoryStream, UrlTallier, VoteBlockStream};
use audit_types::{VoteBlock, VoteBlockVersion};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn participant_blocks(participant: usize, urls: usize) -> Vec<VoteBlock> {
    let mut blocks: Vec<VoteBlock> = (0..urls)
        .filter(|i| (i + participant) % 7 != 0)
        .map(|i| {
            let url = format!("http://example.org/{i:06}");
            let plain = digest(HashAlgorithm::Sha256, url.as_bytes());
            let nonced = digest(HashAlgorithm::Sha256, &[participant as u8]);
            VoteBlock::with_versions(url, vec![VoteBlockVersion::new(plain, nonced)])
        })
        .collect();
    blocks.sort_by(|a, b| audit_types::compare_urls(&a.url, &b.url));
    blocks
}

fn merge_ten_participants_bench(c: &mut Criterion) {
    let inputs: Vec<Vec<VoteBlock>> = (0..10).map(|p| participant_blocks(p, 2_000)).collect();

    c.bench_function("merge_10_participants_2000_urls", |b| {
        b.iter(|| {
            let streams: Vec<Option<Box<dyn VoteBlockStream>>> = inputs
                .iter()
                .map(|blocks| Some(Box::new(MemoryStream::new(blocks.clone())) as Box<dyn VoteBlockStream>))
                .collect();
            let mut tallier = UrlTallier::new(streams);
            let mut urls = 0usize;
            while let Some(url) = tallier.peek_url() {
                let tally = tallier.tally_voter_url(&url).unwrap();
                black_box(tally.tallied_count());
                urls += 1;
            }
            urls
        })
    });
}

criterion_group!(benches, merge_ten_participants_bench);
criterion_main!(benches);
