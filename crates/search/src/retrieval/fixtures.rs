//! Corpus seeding for retrieval tests

use ragforge_common::embeddings::{Embedder, MockEmbedder};
use ragforge_common::store::{CorpusStore, IndexStatus, InMemoryStore, NewChunk, NewSentence};
use ragforge_common::text::normalize;
use uuid::Uuid;

pub(crate) const DIMENSION: usize = 64;

/// Store a document whose chunks are the given sentence groups, joined by
/// single spaces, with mock vectors on the document and every chunk.
pub(crate) async fn seed(store: &InMemoryStore, chunks: &[&[&str]]) -> Uuid {
    let embedder = MockEmbedder::new(DIMENSION);
    let texts: Vec<String> = chunks.iter().map(|sentences| sentences.join(" ")).collect();
    let content = texts.join(" ");

    let document = store
        .create_document(&content, IndexStatus::Completed)
        .await
        .unwrap();
    let vector = embedder.embed(&normalize(&content)).await.unwrap();
    store
        .update_document_embedding(document.id, vector)
        .await
        .unwrap();

    let mut offset = 0;
    let mut new_chunks = Vec::new();
    for text in &texts {
        new_chunks.push(NewChunk {
            start_char: offset,
            end_char: offset + text.len(),
            context: None,
            embedding: Some(embedder.embed(&normalize(text)).await.unwrap()),
        });
        offset += text.len() + 1;
    }
    let records = store.create_chunks(document.id, new_chunks).await.unwrap();

    let mut sentences = Vec::new();
    for (record, group) in records.iter().zip(chunks) {
        let mut start = record.start_char;
        for sentence in group.iter() {
            sentences.push(NewSentence {
                chunk_id: Some(record.id),
                start_char: start,
                end_char: start + sentence.len(),
            });
            start += sentence.len() + 1;
        }
    }
    store.create_sentences(document.id, sentences).await.unwrap();

    document.id
}
