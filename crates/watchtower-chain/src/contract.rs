// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


#![allow(missing_docs)]

use ethers::prelude::abigen;

abigen!(
    TokenNetworkContract,
    r#"[
        function getChannelInfoByChannelIdentifier(bytes32 channel_identifier) external view returns (uint64 settle_block_number, uint64 open_block_number, uint8 state, uint64 settle_timeout)
        function updateBalanceProofDelegate(address token, address partner, address participant, uint256 transferred_amount, bytes32 locksroot, uint64 nonce, bytes32 additional_hash, bytes partner_signature, bytes participant_signature) external
        function unlockDelegate(address token, address partner, address participant, uint256 transferred_amount, uint256 expiration, uint256 amount, bytes32 secret_hash, bytes merkle_proof, bytes participant_signature) external
        function punishObsoleteUnlock(address token, address beneficiary, address cheater, bytes32 lockhash, bytes32 additional_hash, bytes cheater_signature) external
        event ChannelClosed(bytes32 indexed channel_identifier, address closing_participant, bytes32 locksroot, uint256 transferred_amount)
        event BalanceProofUpdated(bytes32 indexed channel_identifier, address participant, bytes32 locksroot, uint256 transferred_amount)
        event ChannelSettled(bytes32 indexed channel_identifier, uint256 participant1_amount, uint256 participant2_amount)
        event ChannelCooperativeSettled(bytes32 indexed channel_identifier, uint256 participant1_amount, uint256 participant2_amount)
        event ChannelWithdraw(bytes32 indexed channel_identifier, address participant1, uint256 participant1_balance, address participant2, uint256 participant2_balance)
    ]"#,
);
