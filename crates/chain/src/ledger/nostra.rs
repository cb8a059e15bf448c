//! Nostra ledgers (Alpha and Mainnet deployments).
//!
//! Nostra splits every listed asset into three ERC-20s: interest-bearing
//! collateral (`iXXX-c`), non-interest-bearing collateral (`nXXX-c`) and debt
//! (`dXXX`). Balance changes arrive as Mint/Burn/Transfer events from those
//! token contracts; interest indices arrive as `InterestStateUpdated` from the
//! interest-rate model, scaled by 1e18, with the collateral index filed under
//! the matching interest-bearing collateral token. Transfers carry raw
//! amounts; Mint/Burn carry face amounts.
//!
//! The deferred batch-call adapter is a protocol-internal buffer wallet, so
//! its legs are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{b256, B256, I256};

use crate::accumulator::Side;
use crate::error::LedgerError;
use crate::event::{Event, NostraEventKind};
use crate::ledger::{LedgerCore, Protocol, ProtocolLedger};
use crate::position::{PositionTemplate, TokenSet};
use crate::tokens::{underlying, RiskParams, TokenEntry, TokenRegistry};

/// Role of one Nostra token contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NostraTokenKind {
    InterestBearingCollateral,
    NonInterestBearingCollateral,
    Debt,
}

/// One Nostra token contract and the underlying it settles in.
#[derive(Debug, Clone, Copy)]
pub struct NostraToken {
    pub symbol: &'static str,
    pub address: B256,
    pub underlying: &'static str,
    pub kind: NostraTokenKind,
}

const fn ib(symbol: &'static str, address: B256, under: &'static str) -> NostraToken {
    NostraToken {
        symbol,
        address,
        underlying: under,
        kind: NostraTokenKind::InterestBearingCollateral,
    }
}

const fn nib(symbol: &'static str, address: B256, under: &'static str) -> NostraToken {
    NostraToken {
        symbol,
        address,
        underlying: under,
        kind: NostraTokenKind::NonInterestBearingCollateral,
    }
}

const fn debt(symbol: &'static str, address: B256, under: &'static str) -> NostraToken {
    NostraToken {
        symbol,
        address,
        underlying: under,
        kind: NostraTokenKind::Debt,
    }
}

const NOSTRA_ALPHA_INTEREST_RATE_MODEL: B256 =
    b256!("03d39f7248fb2bfb960275746470f7fb470317350ad8656249ec66067559e892");

/// First event of this address is a withdrawal; its loan state is protocol
/// plumbing, not a wallet.
const NOSTRA_ALPHA_DEFERRED_ADAPTER: B256 =
    b256!("05a0042fa9bb87ed72fbee4d5a2da416528ebc84a569081ad02e9ad60b0af7d7");

const NOSTRA_ALPHA_TOKENS: &[NostraToken] = &[
    ib("iWBTC-c", b256!("00687b5d9e591844169bc6ad7d7256c4867a10cee6599625b9d78ea17a7caef9"), "WBTC"),
    nib("nWBTC-c", b256!("06b59e2a746e141f90ec8b6e88e695265567ab3bdcf27059b4a15c89b0b7bd53"), "WBTC"),
    debt("dWBTC", b256!("075b0d87aca8dee25df35cdc39a82b406168fa23a76fc3f03abbfdc6620bb6d7"), "WBTC"),
    ib("iETH-c", b256!("070f8a4fcd75190661ca09a7300b7c93fab93971b67ea712c664d7948a8a54c6"), "ETH"),
    nib("nETH-c", b256!("0553cea5d1dc0e0157ffcd36a51a0ced717efdadd5ef1b4644352bb45bd35453"), "ETH"),
    debt("dETH", b256!("040b091cb020d91f4a4b34396946b4d4e2a450dbd9410432ebdbfe10e55ee5e5"), "ETH"),
    ib("iUSDC-c", b256!("029959a546dda754dc823a7b8aa65862c5825faeaaf7938741d8ca6bfdc69e4e"), "USDC"),
    nib("nUSDC-c", b256!("047e794d7c49c49fd2104a724cfa69a92c5a4b50a5753163802617394e973833"), "USDC"),
    debt("dUSDC", b256!("03b6058a9f6029b519bc72b2cc31bcb93ca704d0ab79fec2ae5d43f79ac07f7a"), "USDC"),
    ib("iDAI-c", b256!("01ac55cabf2b79cf39b17ba0b43540a64205781c4b7850e881014aea6f89be58"), "DAI"),
    nib("nDAI-c", b256!("04403e420521e7a4ca0dc5192af81ca0bb36de343564a9495e11c8d9ba6e9d17"), "DAI"),
    debt("dDAI", b256!("0362b4455f5f4cc108a5a1ab1fd2cc6c4f0c70597abb541a99cf2734435ec9cb"), "DAI"),
    ib("iUSDT-c", b256!("055ba2baf189b98c59f6951a584a3a7d7d6ff2c4ef88639794e739557e1876f0"), "USDT"),
    nib("nUSDT-c", b256!("003cd2066f3c8b4677741b39db13acebba843bbbaa73d657412102ab4fd98601"), "USDT"),
    debt("dUSDT", b256!("065c6c7119b738247583286021ea05acc6417aa86d391dcdda21843c1fc6e9c6"), "USDT"),
];

const NOSTRA_MAINNET_INTEREST_RATE_MODEL: B256 =
    b256!("059a943ca214c10234b9a3b61c558ac20c005127d183b86a99a8f3c60a08b4ff");

const NOSTRA_MAINNET_TOKENS: &[NostraToken] = &[
    ib("iWBTC-c", b256!("05b7d301fa769274f20e89222169c0fad4d846c366440afc160aafadd6f88f0c"), "WBTC"),
    nib("nWBTC-c", b256!("036b68238f3a90639d062669fdec08c4d0bdd09826b1b6d24ef49de6d8141eaa"), "WBTC"),
    debt("dWBTC", b256!("0491480f21299223b9ce770f23a2c383437f9fbf57abc2ac952e9af8cdb12c97"), "WBTC"),
    ib("iETH-c", b256!("057146f6409deb4c9fa12866915dd952aa07c1eb2752e451d7f3b042086bdeb8"), "ETH"),
    nib("nETH-c", b256!("044debfe17e4d9a5a1e226dabaf286e72c9cc36abbe71c5b847e669da4503893"), "ETH"),
    debt("dETH", b256!("00ba3037d968790ac486f70acaa9a1cab10cf5843bb85c986624b4d0e5a82e74"), "ETH"),
    ib("iUSDC-c", b256!("05dcd26c25d9d8fd9fc860038dcb6e4d835e524eb8a85213a8cda5b7fff845f6"), "USDC"),
    nib("nUSDC-c", b256!("05f296e1b9f4cf1ab452c218e72e02a8713cee98921dad2d3b5706235e128ee4"), "USDC"),
    debt("dUSDC", b256!("063d69ae657bd2f40337c39bf35a870ac27ddf91e6623c2f52529db4c1619a51"), "USDC"),
    ib("iDAI-c", b256!("04f18ffc850cdfa223a530d7246d3c6fc12a5969e0aa5d4a88f470f5fe6c46e9"), "DAI"),
    nib("nDAI-c", b256!("005c4676bcb21454659479b3cd0129884d914df9c9b922c1c649696d2e058d70"), "DAI"),
    debt("dDAI", b256!("066037c083c33330a8460a65e4748ceec275bbf5f28aa71b686cbc0010e12597"), "DAI"),
    ib("iUSDT-c", b256!("0453c4c996f1047d9370f824d68145bd5e7ce12d00437140ad02181e1d11dc83"), "USDT"),
    nib("nUSDT-c", b256!("0514bd7ee8c97d4286bd481c54aa0793e43edbfb7e1ab9784c4b30469dcf9313"), "USDT"),
    debt("dUSDT", b256!("024e9b0d6bc79e111e6872bb1ada2a874c25712cf08dfc5bcf0de008a7cca55f"), "USDT"),
    ib("iwstETH-c", b256!("009377fdde350e01e0397820ea83ed3b4f05df30bfb8cf8055d62cafa1b2106a"), "wstETH"),
    nib("nwstETH-c", b256!("05eb6de9c7461b3270d029f00046c8a10d27d4f4a4c931a4ea9769c72ef4edbb"), "wstETH"),
    debt("dwstETH", b256!("0348cc417fc877a7868a66510e8e0d0f3f351f5e6b0886a86b652fcb30a3d1fb"), "wstETH"),
    ib("iLORDS-c", b256!("0739760bce37f89b6c1e6b1198bb8dc7166b8cf21509032894f912c9d5de9cbd"), "LORDS"),
    nib("nLORDS-c", b256!("02530a305dd3d92aad5cf97e373a3d07577f6c859337fb0444b9e851ee4a2dd4"), "LORDS"),
    debt("dLORDS", b256!("035778d24792bbebcf7651146896df5f787641af9e2a3db06480a637fbc9fff8"), "LORDS"),
    ib("iSTRK-c", b256!("07c2e1e733f28daa23e78be3a4f6c724c0ab06af65f6a95b5e0545215f1abc1b"), "STRK"),
    nib("nSTRK-c", b256!("040f5a6b7a6d3c472c12ca31ae6250b462c6d35bbdae17bd52f6c6ca065e30cf"), "STRK"),
    debt("dSTRK", b256!("001258eae3eae5002125bebf062d611a772e8aea3a1879b64a19f363ebd00947"), "STRK"),
];

const ACCUMULATOR_SCALE_POW10: u8 = 18;

struct UnderlyingRisk {
    symbol: &'static str,
    collateral_factor: f64,
    debt_factor: f64,
    liquidator_fee_beta: f64,
    liquidator_fee_max: f64,
}

const UNDERLYING_RISK: &[UnderlyingRisk] = &[
    UnderlyingRisk { symbol: "ETH", collateral_factor: 0.8, debt_factor: 0.9, liquidator_fee_beta: 2.75, liquidator_fee_max: 0.25 },
    UnderlyingRisk { symbol: "USDC", collateral_factor: 0.9, debt_factor: 0.95, liquidator_fee_beta: 1.65, liquidator_fee_max: 0.15 },
    UnderlyingRisk { symbol: "USDT", collateral_factor: 0.9, debt_factor: 0.95, liquidator_fee_beta: 1.65, liquidator_fee_max: 0.15 },
    UnderlyingRisk { symbol: "DAI", collateral_factor: 0.0, debt_factor: 0.95, liquidator_fee_beta: 2.2, liquidator_fee_max: 0.2 },
    UnderlyingRisk { symbol: "WBTC", collateral_factor: 0.0, debt_factor: 0.8, liquidator_fee_beta: 2.75, liquidator_fee_max: 0.25 },
    UnderlyingRisk { symbol: "wstETH", collateral_factor: 1.0, debt_factor: 1.0, liquidator_fee_beta: 0.0, liquidator_fee_max: 0.0 },
    UnderlyingRisk { symbol: "LORDS", collateral_factor: 0.0, debt_factor: 1.0, liquidator_fee_beta: 0.0, liquidator_fee_max: 0.0 },
    UnderlyingRisk { symbol: "STRK", collateral_factor: 0.0, debt_factor: 1.0, liquidator_fee_beta: 0.0, liquidator_fee_max: 0.0 },
];

const PROTOCOL_FEE: f64 = 0.02;

fn risk_for(token: &NostraToken, liquidation_bonus: f64) -> RiskParams {
    let base = UNDERLYING_RISK
        .iter()
        .find(|r| r.symbol == token.underlying);
    let Some(base) = base else {
        return RiskParams::NEUTRAL;
    };
    match token.kind {
        NostraTokenKind::Debt => RiskParams {
            debt_factor: base.debt_factor,
            ..RiskParams::NEUTRAL
        },
        _ => RiskParams {
            collateral_factor: base.collateral_factor,
            liquidation_bonus,
            liquidator_fee_beta: base.liquidator_fee_beta,
            liquidator_fee_max: base.liquidator_fee_max,
            protocol_fee: PROTOCOL_FEE,
            ..RiskParams::NEUTRAL
        },
    }
}

/// Event fold for one Nostra deployment.
pub struct NostraLedger {
    protocol: Protocol,
    core: LedgerCore,
    registry: TokenRegistry,
    tokens: HashMap<B256, &'static NostraToken>,
    interest_rate_model: B256,
    deferred_adapter: Option<B256>,
    /// underlying symbol -> interest-bearing collateral token symbol, for
    /// filing collateral indices from `InterestStateUpdated`.
    ib_collateral: HashMap<&'static str, &'static str>,
}

impl NostraLedger {
    pub fn alpha() -> Self {
        Self::with_deployment(
            Protocol::NostraAlpha,
            NOSTRA_ALPHA_TOKENS,
            NOSTRA_ALPHA_INTEREST_RATE_MODEL,
            Some(NOSTRA_ALPHA_DEFERRED_ADAPTER),
            0.0,
        )
    }

    pub fn mainnet() -> Self {
        Self::with_deployment(
            Protocol::NostraMainnet,
            NOSTRA_MAINNET_TOKENS,
            NOSTRA_MAINNET_INTEREST_RATE_MODEL,
            None,
            0.2,
        )
    }

    fn with_deployment(
        protocol: Protocol,
        listed: &'static [NostraToken],
        interest_rate_model: B256,
        deferred_adapter: Option<B256>,
        liquidation_bonus: f64,
    ) -> Self {
        let entries = listed
            .iter()
            .map(|nostra| {
                let mut token = *underlying(nostra.underlying)
                    .unwrap_or_else(|_| unreachable!("listed tokens use known underlyings"));
                token.symbol = nostra.symbol;
                token.address = nostra.address;
                TokenEntry {
                    token,
                    underlying: nostra.underlying,
                    risk: risk_for(nostra, liquidation_bonus),
                }
            })
            .collect();
        let registry = TokenRegistry::new(entries);

        let collateral_set = Arc::new(TokenSet::new(
            registry
                .entries()
                .iter()
                .zip(listed)
                .filter(|(_, n)| n.kind != NostraTokenKind::Debt)
                .map(|(e, _)| (e.token.symbol, e.token.dust))
                .collect(),
        ));
        let debt_set = Arc::new(TokenSet::new(
            registry
                .entries()
                .iter()
                .zip(listed)
                .filter(|(_, n)| n.kind == NostraTokenKind::Debt)
                .map(|(e, _)| (e.token.symbol, e.token.dust))
                .collect(),
        ));
        let template = PositionTemplate {
            collateral: collateral_set,
            debt: debt_set,
            deposit: None,
        };

        let tokens = listed.iter().map(|t| (t.address, t)).collect();
        let ib_collateral = listed
            .iter()
            .filter(|t| t.kind == NostraTokenKind::InterestBearingCollateral)
            .map(|t| (t.underlying, t.symbol))
            .collect();

        Self {
            protocol,
            core: LedgerCore::new(template, ACCUMULATOR_SCALE_POW10),
            registry,
            tokens,
            interest_rate_model,
            deferred_adapter,
            ib_collateral,
        }
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    fn is_deferred(&self, wallet: &B256) -> bool {
        self.deferred_adapter.as_ref() == Some(wallet)
    }

    /// `InterestStateUpdated`:
    /// [debtToken, lendingRate, _, borrowRate, _, lendIndex, _, borrowIndex, _]
    fn apply_interest_update(&mut self, event: &Event<NostraEventKind>) -> Result<(), LedgerError> {
        let reader = event.reader();
        let debt_address = reader.felt(0)?;
        let lend_index = reader.uint(5)?;
        let borrow_index = reader.uint(7)?;
        let token = *self
            .tokens
            .get(&debt_address)
            .ok_or_else(|| event.malformed(format!("interest update for unlisted token {debt_address}")))?;
        if token.kind != NostraTokenKind::Debt {
            return Err(event.malformed("interest update does not reference a debt token"));
        }
        self.core
            .accumulators
            .set_index(token.symbol, Side::Debt, borrow_index)?;
        if let Some(&collateral_symbol) = self.ib_collateral.get(token.underlying) {
            self.core
                .accumulators
                .set_index(collateral_symbol, Side::Lending, lend_index)?;
        }
        Ok(())
    }

    /// Mint/Burn carry face amounts; convert through the token's index.
    /// Non-interest-bearing collateral has no index, so face equals raw.
    fn face_to_raw(&self, token: &NostraToken, face: I256) -> Result<I256, LedgerError> {
        match token.kind {
            NostraTokenKind::InterestBearingCollateral => {
                self.core
                    .accumulators
                    .face_to_raw(token.symbol, face, Side::Lending)
            }
            NostraTokenKind::NonInterestBearingCollateral => Ok(face),
            NostraTokenKind::Debt => {
                self.core
                    .accumulators
                    .face_to_raw(token.symbol, face, Side::Debt)
            }
        }
    }

    fn adjust(&mut self, token: &NostraToken, wallet: B256, raw: I256) -> Result<(), LedgerError> {
        let position = self.core.position_mut(wallet);
        match token.kind {
            NostraTokenKind::Debt => position.debt.increase(token.symbol, raw),
            _ => position.collateral.increase(token.symbol, raw),
        }
    }

    fn apply_mint_burn(
        &mut self,
        token: &'static NostraToken,
        event: &Event<NostraEventKind>,
        sign: i8,
    ) -> Result<(), LedgerError> {
        // [user, amount, _]
        let reader = event.reader();
        let wallet = reader.felt(0)?;
        if self.is_deferred(&wallet) {
            return Ok(());
        }
        let face = reader.int(1)?;
        let raw = self.face_to_raw(token, face)?;
        self.adjust(token, wallet, if sign < 0 { -raw } else { raw })
    }

    /// Transfers move raw amounts. Zero-address legs are mints and burns
    /// covered by their own events.
    fn apply_transfer(
        &mut self,
        token: &'static NostraToken,
        event: &Event<NostraEventKind>,
    ) -> Result<(), LedgerError> {
        // [sender, recipient, value, _]
        let reader = event.reader();
        let sender = reader.felt(0)?;
        let recipient = reader.felt(1)?;
        if sender == B256::ZERO || recipient == B256::ZERO {
            return Ok(());
        }
        let raw = reader.int(2)?;
        if !self.is_deferred(&sender) {
            self.adjust(token, sender, -raw)?;
        }
        if !self.is_deferred(&recipient) {
            self.adjust(token, recipient, raw)?;
        }
        Ok(())
    }
}

impl ProtocolLedger for NostraLedger {
    type Kind = NostraEventKind;

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn core(&self) -> &LedgerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LedgerCore {
        &mut self.core
    }

    fn apply(&mut self, event: &Event<NostraEventKind>) -> Result<(), LedgerError> {
        if event.emitter == self.interest_rate_model {
            return match event.kind {
                NostraEventKind::InterestStateUpdated => self.apply_interest_update(event),
                _ => Err(event.malformed("unexpected event from the interest-rate model")),
            };
        }
        let token = *self
            .tokens
            .get(&event.emitter)
            .ok_or_else(|| event.malformed(format!("event from unlisted contract {}", event.emitter)))?;
        match event.kind {
            NostraEventKind::Mint => self.apply_mint_burn(token, event, 1),
            NostraEventKind::Burn => self.apply_mint_burn(token, event, -1),
            NostraEventKind::Transfer => self.apply_transfer(token, event),
            NostraEventKind::InterestStateUpdated => {
                Err(event.malformed("interest update from a token contract"))
            }
        }
    }
}
