// Accumulate in f64; stored vectors are f32.

pub fn l2_norm(v: &[f32]) -> f64 {
    let mut sum = 0.0f64;
    for &x in v {
        let x = f64::from(x);
        sum += x * x;
    }
    sum.sqrt()
}

/// Cosine similarity given precomputed norms. A zero vector on either side scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f64, b_norm: f64) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let mut dot = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
    }
    (dot / (a_norm * b_norm)).clamp(-1.0, 1.0) as f32
}
