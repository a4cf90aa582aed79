pub const SYSTEM_PROMPT: &str = r#"You are a network graph maker who extracts terms and their relations from a given context.
You are provided with a context chunk (delimited by ```). Your task is to extract the ontology
of terms mentioned in the given context. These terms should represent the key concepts
according to the context. Output ONLY a single JSON object and nothing else."#;

pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract concepts and relationships from the following text.

INSTRUCTIONS:
1. Identify key concepts (organisms, diseases, places, methods, chemicals, organizations, events, conditions)
2. Rate each concept's importance to the text from 1 (peripheral) to 5 (central)
3. Extract relationships between pairs of concepts
4. Output ONLY valid JSON, nothing else
5. Use the exact schema below

SCHEMA:
{{
  "concepts": [
    {{"entity": "concept name", "importance": 1, "category": "category name"}}
  ],
  "relationships": [
    {{"node_1": "concept name", "node_2": "concept name", "edge": "relationship between node_1 and node_2"}}
  ]
}}

RULES:
- importance must be an integer from 1 to 5
- node_1 and node_2 must be entity names from the concepts list
- Keep entity names atomic: one concept per entity
- Use the entity name exactly as written in the text
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
```{}```

JSON OUTPUT:"#,
        chunk_text
    )
}

/// Longest slice of the invalid response echoed back in a correction prompt.
const MAX_ECHO_CHARS: usize = 4000;

/// Correction prompt after a non-conforming response. Repeats the source
/// text so a response with no usable JSON can still be answered from it.
pub fn build_retry_prompt(chunk_text: &str, invalid_json: &str) -> String {
    let echoed: String = invalid_json.chars().take(MAX_ECHO_CHARS).collect();
    format!(
        r#"Your previous answer is invalid or does not match the required schema:

{}

Extract the concepts and relationships again from this text:

TEXT:
```{}```

Answer with a single object with a "concepts" array (entity, importance 1-5, category) and a "relationships" array (node_1, node_2, edge).
Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        echoed, chunk_text
    )
}
