//! Property-based tests for the attention cache and head bookkeeping.

use kv_attn::{
    attention_weights, merge_heads, split_heads, AttentionCache, AttentionConfig, AttentionMask,
    MultiHeadAttention,
};
use kv_tensor::{CpuBackend, Shape, Tensor};
use proptest::prelude::*;

/// Strategy for a tensor of the given shape with values in [-2, 2).
fn tensor_strategy(dims: Vec<usize>) -> impl Strategy<Value = Tensor> {
    let n: usize = dims.iter().product();
    prop::collection::vec(-2.0f32..2.0f32, n).prop_map(move |data| Tensor::new(data, Shape::new(dims.clone())))
}

/// (num_heads, head_dim) pairs for small layers.
fn heads_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..4, 1usize..5)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// cached length is the running sum of appended lengths, and earlier
    /// positions never change
    #[test]
    fn test_append_is_monotonic(
        (heads, head_dim) in heads_strategy(),
        steps in prop::collection::vec(1usize..4, 1..6),
        seed in any::<u32>(),
    ) {
        let mut cache = AttentionCache::new(2, heads, head_dim).unwrap();
        let mut expected_len = 0;

        for (i, &s_new) in steps.iter().enumerate() {
            let n = 2 * heads * s_new * head_dim;
            let data: Vec<f32> = (0..n)
                .map(|j| (seed.wrapping_add((i * 1000 + j) as u32) % 97) as f32)
                .collect();
            let k = Tensor::new(data.clone(), Shape::new(vec![2, heads, s_new, head_dim]));
            let v = Tensor::new(data, Shape::new(vec![2, heads, s_new, head_dim]));

            let before = cache.keys();
            let prev_len = cache.len();
            cache.append(&k, &v).unwrap();
            expected_len += s_new;

            prop_assert_eq!(cache.len(), expected_len);
            prop_assert_eq!(cache.keys().narrow(2, 0, prev_len).unwrap(), before);
            prop_assert_eq!(cache.keys().narrow(2, prev_len, s_new).unwrap(), k);
        }
    }

    /// merging heads undoes splitting them exactly
    #[test]
    fn test_split_merge_inverse(
        (heads, head_dim) in heads_strategy(),
        batch in 1usize..3,
        seq in 1usize..5,
        seed in any::<u64>(),
    ) {
        let embed = heads * head_dim;
        let n = batch * seq * embed;
        let data: Vec<f32> = (0..n as u64).map(|i| (seed ^ i.wrapping_mul(31)) as f32).collect();
        let x = Tensor::new(data, Shape::new(vec![batch, seq, embed]));

        let split = split_heads(&x, heads).unwrap();
        prop_assert_eq!(split.dims(), &[batch, heads, seq, head_dim][..]);
        prop_assert_eq!(merge_heads(&split).unwrap(), x);
    }

    /// causal prompt weights are zero above the diagonal and each row sums to one
    #[test]
    fn test_causal_rows_are_distributions(
        q in tensor_strategy(vec![1, 2, 4, 3]),
        k in tensor_strategy(vec![1, 2, 4, 3]),
    ) {
        let backend = CpuBackend::new();
        let w = attention_weights(&q, &k, AttentionMask::Causal, &backend).unwrap();
        for h in 0..2 {
            for i in 0..4 {
                let mut sum = 0.0f32;
                for j in 0..4 {
                    let p = w.get(&[0, h, i, j]).unwrap();
                    if j > i {
                        prop_assert_eq!(p, 0.0);
                    }
                    sum += p;
                }
                prop_assert!((sum - 1.0).abs() < 1e-5);
            }
        }
    }

    /// feeding tokens one at a time reproduces full causal self-attention
    #[test]
    fn test_incremental_equals_full(
        x in tensor_strategy(vec![1, 4, 6]),
        seed in any::<u64>(),
        bias in any::<bool>(),
    ) {
        let backend = CpuBackend::new();
        let config = AttentionConfig::new(6, 2, 1).unwrap().with_bias(bias);
        let mha = MultiHeadAttention::seeded(config, seed).unwrap();

        let full = mha.forward(&x, true, &backend).unwrap();
        let mut cache = mha.new_cache().unwrap();
        for t in 0..4 {
            let out = mha.step(&mut cache, &x.narrow(1, t, 1).unwrap(), true, &backend).unwrap();
            let expected = full.narrow(1, t, 1).unwrap();
            for (a, b) in out.data_f32().iter().zip(expected.data_f32()) {
                prop_assert!((a - b).abs() <= 1e-5 * (1.0 + b.abs()), "{} vs {}", a, b);
            }
        }
    }
}
