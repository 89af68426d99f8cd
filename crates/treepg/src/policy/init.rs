//! Seeded parameter initialization.

use crate::Result;
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use rand::Rng;
use rand_distr::Uniform;

/// Re-initialize every variable in `varmap` from `rng`.
///
/// Variables are visited in name order so the draw sequence depends only on
/// the seed and the architecture. Biases are zeroed; matrices get Glorot
/// uniform values over `[out, in]` fan.
pub fn seeded_init<R: Rng>(varmap: &VarMap, rng: &mut R, device: &Device) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| crate::TreePgError::InvalidInput("parameter store poisoned".into()))?;

    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();

    for name in names {
        let var = &vars[name];
        let dims = var.dims().to_vec();
        let numel: usize = dims.iter().product();

        let values: Vec<f32> = if dims.len() == 2 && !name.contains("bias") {
            let limit = (6.0 / (dims[0] + dims[1]) as f32).sqrt();
            let dist = Uniform::new_inclusive(-limit, limit);
            (0..numel).map(|_| rng.sample(dist)).collect()
        } else {
            vec![0.0; numel]
        };

        var.set(&Tensor::from_vec(values, dims.as_slice(), device)?)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarBuilder;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn build(seed: u64) -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        candle_nn::linear(4, 3, vb.pp("a")).unwrap();
        candle_nn::linear(3, 2, vb.pp("b")).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        seeded_init(&varmap, &mut rng, &Device::Cpu).unwrap();
        varmap
    }

    fn values(varmap: &VarMap, name: &str) -> Vec<f32> {
        let vars = varmap.data().lock().unwrap();
        vars[name].flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let a = build(7);
        let b = build(7);
        assert_eq!(values(&a, "a.weight"), values(&b, "a.weight"));
        assert_eq!(values(&a, "b.weight"), values(&b, "b.weight"));
    }

    #[test]
    fn test_different_seed_different_parameters() {
        let a = build(7);
        let b = build(8);
        assert_ne!(values(&a, "a.weight"), values(&b, "a.weight"));
    }

    #[test]
    fn test_biases_zero_and_weights_bounded() {
        let varmap = build(3);
        assert!(values(&varmap, "a.bias").iter().all(|&v| v == 0.0));
        let limit = (6.0f32 / 7.0).sqrt();
        assert!(values(&varmap, "a.weight")
            .iter()
            .all(|&v| v.abs() <= limit));
    }
}
