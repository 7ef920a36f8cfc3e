// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed bindings for the destination-chain contracts.
//!
//! The validator contract accepts one quorum-signed submission per transfer
//! and records a settle height per aggregate id; the witness-list contract it
//! points at pages out the currently active witness addresses.

use ethers::contract::abigen;

abigen!(
    TransferValidatorContract,
    r#"[
        function witnessList() external view returns (address)
        function settles(bytes32 id) external view returns (uint256)
        function submit(address cashier, address token, uint256 index, address from, address to, uint256 amount, bytes signatures) external
    ]"#
);

abigen!(
    WitnessListContract,
    r#"[
        function count() external view returns (uint256)
        function getActiveItems(uint256 offset, uint8 limit) external view returns (uint256 activeCount, address[] items)
    ]"#
);
