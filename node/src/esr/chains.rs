use cosigner_primitives::ChainId;
use hex_literal::hex;

/// Networks a signing request may name by a one-byte alias instead of the
/// full chain id.
const KNOWN_CHAINS: [(u8, &str, [u8; 32]); 12] = [
    (1, "EOS", hex!("aca376f206b8fc25a6ed44dbdc66547c36c6c33e3a119ffbeaef943642f0e906")),
    (2, "TELOS", hex!("4667b205c6838ef70ff7988f6e8257e8be0e1284a2f59699054a018f743b1d11")),
    (3, "JUNGLE", hex!("e70aaab8997e1dfce58fbfac80cbbb8fecec7b99cf982a9444273cbc64c41473")),
    (4, "KYLIN", hex!("5fff1dae8dc8e2fc4d5b23b2c7665c97f9e9d8edf2b6485a86ba311c25639191")),
    (5, "WORBLI", hex!("73647cde120091e0a4b85bced2f3cfdb3041e266cbbe95cee59b73235a1b3b6f")),
    (6, "BOS", hex!("d5a3d18fbb3c084e3b1f3fa98c21014b5f3db536cc15d08f9f6479517c6a3d86")),
    (7, "MEETONE", hex!("cfe6486a83bad4962f232d48003b1824ab5665c36778141034d75e57b956e422")),
    (8, "INSIGHTS", hex!("b042025541e25a472bffde2d62edd457b7e70cee943412b1ea0f044f88591664")),
    (9, "BEOS", hex!("b912d19a6abd2b1b05611ae5be473355d64d95aeff0c09bedc8c166cd6468fe4")),
    (10, "WAX", hex!("1064487b3cd1a897ce03ae5b6a865651747e2e152090f99c1d19d44e01aea5a4")),
    (11, "PROTON", hex!("384da888112027f0321850a169f737c33e53b388aad48b5adace4bab97f437e0")),
    (12, "FIO", hex!("21dcae42c0182200e93f954a074011f9048a7624c6fe81d3c9541a614a88bd1c")),
];

pub fn chain_id_for_alias(alias: u8) -> Option<ChainId> {
    KNOWN_CHAINS
        .iter()
        .find(|(known, _, _)| *known == alias)
        .map(|(_, _, id)| ChainId::from(*id))
}

pub fn alias_for_chain_id(chain_id: &ChainId) -> Option<u8> {
    KNOWN_CHAINS
        .iter()
        .find(|(_, _, id)| id == chain_id.as_bytes())
        .map(|(alias, _, _)| *alias)
}

pub fn chain_name(alias: u8) -> Option<&'static str> {
    KNOWN_CHAINS
        .iter()
        .find(|(known, _, _)| *known == alias)
        .map(|(_, name, _)| *name)
}
