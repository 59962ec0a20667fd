//! Compute-array contract.
//!
//! A tile hosts `array_count` independent arrays. Starting an array hands its
//! input operands to a [`ComputeArray`] implementation, which produces the
//! output operands after [`ComputeArray::latency`] ticks. The tile register
//! model owns the scheduling; implementations only describe what is computed
//! and how long it takes.

/// Computation performed by the arrays of one tile.
pub trait ComputeArray {
    /// Compute the outputs of `array_id` from its inputs.
    ///
    /// `input` has `input_len` operands, `output` has `output_len` operands.
    fn compute(&mut self, array_id: u32, input: &[u64], output: &mut [u64]);

    /// Latency in ticks between start and done for `array_id`.
    fn latency(&self, array_id: u32) -> u64;
}

/// Trivial array that adds the array ID to each input operand.
///
/// Outputs beyond the input length are set to the array ID.
#[derive(Debug, Clone, Copy)]
pub struct TestComputeArray {
    latency: u64,
}

impl TestComputeArray {
    /// Create a test array with a fixed latency for every array.
    pub fn new(latency: u64) -> Self {
        Self { latency }
    }
}

impl Default for TestComputeArray {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ComputeArray for TestComputeArray {
    fn compute(&mut self, array_id: u32, input: &[u64], output: &mut [u64]) {
        for (i, out) in output.iter_mut().enumerate() {
            let operand = input.get(i).copied().unwrap_or(0);
            *out = operand.wrapping_add(array_id as u64);
        }
    }

    fn latency(&self, _array_id: u32) -> u64 {
        self.latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adds_array_id() {
        let mut array = TestComputeArray::new(5);
        let input = [1, 2, 3, 4];
        let mut output = [0u64; 4];

        array.compute(3, &input, &mut output);
        assert_eq!(output, [4, 5, 6, 7]);
        assert_eq!(array.latency(3), 5);
    }

    #[test]
    fn test_output_longer_than_input() {
        let mut array = TestComputeArray::default();
        let mut output = [9u64; 3];

        array.compute(2, &[10], &mut output);
        assert_eq!(output, [12, 2, 2]);
    }

    #[test]
    fn test_dyn_dispatch() {
        let mut array: Box<dyn ComputeArray> = Box::new(TestComputeArray::new(1));
        let mut output = [0u64; 2];
        array.compute(0, &[7, 8], &mut output);
        assert_eq!(output, [7, 8]);
    }
}
