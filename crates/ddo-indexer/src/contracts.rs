//! Typed on-chain reads used by the processors and the authorization gate.

use crate::abi::{IAccessList, IDispenser, IERC20Template, IERC721Template, IFactory, IFixedRateExchange};
use crate::ddo::PriceEntry;
use crate::error::IndexerError;
use crate::retry::{retry, RetryPolicy};
use crate::rpc::ChainClient;
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;

/// Fixed-rate exchange state as returned by `getExchange`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeInfo {
    pub exchange_owner: Address,
    pub datatoken: Address,
    pub base_token: Address,
    pub fixed_rate: U256,
    pub active: bool,
}

/// Read-only contract access for one chain, with bounded retry on every call.
#[derive(Clone, Copy)]
pub struct ChainReader<'a> {
    client: &'a dyn ChainClient,
    retry: RetryPolicy,
}

impl<'a> ChainReader<'a> {
    pub fn new(client: &'a dyn ChainClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn call<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, IndexerError> {
        let data = call.abi_encode();
        let raw = retry(&self.retry, C::SIGNATURE, || {
            self.client.call(to, data.clone().into())
        })
        .await?;
        Ok(C::abi_decode_returns(&raw, true)?)
    }

    /// NFT that owns a datatoken.
    pub async fn datatoken_nft(&self, datatoken: Address) -> Result<Address, IndexerError> {
        Ok(self
            .call(datatoken, IERC20Template::getERC721AddressCall {})
            .await?
            ._0)
    }

    pub async fn token_name(&self, token: Address) -> Result<String, IndexerError> {
        Ok(self.call(token, IERC20Template::nameCall {}).await?._0)
    }

    pub async fn token_symbol(&self, token: Address) -> Result<String, IndexerError> {
        Ok(self.call(token, IERC20Template::symbolCall {}).await?._0)
    }

    pub async fn nft_token_uri(&self, nft: Address) -> Result<String, IndexerError> {
        Ok(self
            .call(nft, IERC721Template::tokenURICall { id: U256::from(1) })
            .await?
            ._0)
    }

    pub async fn dispensers(&self, datatoken: Address) -> Result<Vec<Address>, IndexerError> {
        Ok(self
            .call(datatoken, IERC20Template::getDispensersCall {})
            .await?
            ._0)
    }

    /// (exchange contract, exchange id) pairs attached to a datatoken.
    pub async fn fixed_rates(&self, datatoken: Address) -> Result<Vec<(Address, B256)>, IndexerError> {
        Ok(self
            .call(datatoken, IERC20Template::getFixedRatesCall {})
            .await?
            ._0
            .into_iter()
            .map(|r| (r.contractAddress, r.id))
            .collect())
    }

    pub async fn dispenser_active(&self, dispenser: Address, datatoken: Address) -> Result<bool, IndexerError> {
        Ok(self
            .call(dispenser, IDispenser::statusCall { datatoken })
            .await?
            .active)
    }

    pub async fn exchange(&self, exchange: Address, id: B256) -> Result<ExchangeInfo, IndexerError> {
        let r = self
            .call(exchange, IFixedRateExchange::getExchangeCall { exchangeId: id })
            .await?;
        Ok(ExchangeInfo {
            exchange_owner: r.exchangeOwner,
            datatoken: r.datatoken,
            base_token: r.baseToken,
            fixed_rate: r.fixedRate,
            active: r.active,
        })
    }

    /// Whether `nft` was deployed by `factory`.
    pub async fn deployed_by_factory(&self, factory: Address, nft: Address) -> Result<bool, IndexerError> {
        let listed = self.call(factory, IFactory::erc721ListCall { nft }).await?._0;
        Ok(listed == nft)
    }

    pub async fn holds_access(&self, list: Address, account: Address) -> Result<bool, IndexerError> {
        let balance = self
            .call(list, IAccessList::balanceOfCall { owner: account })
            .await?
            ._0;
        Ok(balance > U256::ZERO)
    }

    /// True if `account` holds a token on any of `lists`.
    pub async fn holds_any_access(&self, lists: &[Address], account: Address) -> Result<bool, IndexerError> {
        for list in lists {
            if self.holds_access(*list, account).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Current active prices of a datatoken: its dispensers and fixed-rate exchanges.
    pub async fn prices(&self, datatoken: Address) -> Result<Vec<PriceEntry>, IndexerError> {
        let mut prices = Vec::new();
        let datatoken_str = datatoken.to_checksum(None);
        for dispenser in self.dispensers(datatoken).await? {
            if self.dispenser_active(dispenser, datatoken).await? {
                prices.push(PriceEntry::dispenser(
                    &dispenser.to_checksum(None),
                    &datatoken_str,
                ));
            }
        }
        for (exchange, id) in self.fixed_rates(datatoken).await? {
            let info = self.exchange(exchange, id).await?;
            if info.active {
                prices.push(PriceEntry::fixed_rate(
                    &exchange.to_checksum(None),
                    &info.base_token.to_checksum(None),
                    &id.to_string(),
                    format_ether(info.fixed_rate),
                ));
            }
        }
        Ok(prices)
    }
}
