pub fn get_bits<const START: usize, const END: usize>(n: u16) -> u16 {
    debug_assert!(
        END <= 15 && START <= END,
        "start and end bits out of bounds"
    );
    let mask = u16::MAX >> (15 - (END - START));
    (n >> START) & mask
}

/// Widen the low `NUM_BITS` of `n` to 16 bits, copying the field's top bit into every bit above it.
/// Bits of `n` above the field are ignored.
pub fn sign_extend<const NUM_BITS: usize>(n: u16) -> u16 {
    debug_assert!(NUM_BITS > 0 && NUM_BITS < 16);
    let field = n & !(u16::MAX << NUM_BITS);
    if (field >> (NUM_BITS - 1)) & 1 == 1 {
        field | (u16::MAX << NUM_BITS)
    } else {
        field
    }
}
